#![no_main]
use libfuzzer_sys::fuzz_target;
use tsvm_mov_parse::{PacketWalker, ScanConfig};

fuzz_target!(|data: &[u8]| {
    let config = ScanConfig::unlimited();
    let mut src = std::io::Cursor::new(data);
    let mut walker = PacketWalker::with_config(&mut src, 0, &config, &enough::Unstoppable);
    while let Ok(Some(_)) = walker.next_packet() {}
    assert!(walker.end().is_some());
});
