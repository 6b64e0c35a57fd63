#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut src = std::io::Cursor::new(data);
    if let Ok(analysis) = tsvm_mov_parse::read_mov(&mut src) {
        assert!(analysis.packets.len() <= 50);
        for pair in analysis.packets.windows(2) {
            assert_eq!(pair[0].end(), pair[1].offset);
        }
    }
});
