//! Print the header and packet framing of a TSVM MOV file
use std::env;
use std::fs::File;
use std::io::BufReader;

use tsvm_mov_parse::{PacketKind, ScanConfig, ScanEnd, Unstoppable};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <tvdos_file.mov>", args[0]);
        std::process::exit(1);
    }

    let path = &args[1];
    let mut f = BufReader::new(File::open(path).expect("Failed to open file"));
    let config = ScanConfig::default();
    let analysis = tsvm_mov_parse::read_mov_with_config(&mut f, &config, &Unstoppable).expect("Failed to read file");
    let header = &analysis.header;

    println!("TVDOS File Analysis");
    println!("===================\n");
    print!("Magic: ");
    for b in header.signature {
        print!("{b:02X} ");
    }
    println!("({})", if analysis.signature_ok { "OK" } else { "INVALID" });
    println!("Dimensions: {}x{}", header.width, header.height);
    println!("FPS: {}", header.frame_rate);
    println!("Frame Count: {}", header.frame_count);
    println!("Unused: 0x{:04X}", header.unused);

    let audio = header.audio_queue_info;
    println!("Audio Queue Info: 0x{:04X}", audio.raw());
    println!("  Queue Size: {}", audio.queue_size());
    println!("  Block Size: {} bytes", audio.block_size());
    println!("  Has Audio: {}", if audio.has_audio() { "Yes" } else { "No" });
    print!("Reserved: ");
    for b in header.reserved {
        print!("{b:02X} ");
    }
    println!("\n");

    println!("Packet Analysis");
    println!("===============\n");
    for (i, packet) in analysis.packets.iter().enumerate() {
        println!("Packet {i} @ 0x{:X}: Type {} ({})", packet.offset, packet.tag, packet.kind);
        match packet.kind {
            PacketKind::Sync => {},
            PacketKind::BackgroundColor(Some(c)) => println!("  RGB: {}, {}, {}", c.r, c.g, c.b),
            PacketKind::BackgroundColor(None) => println!("  RGB: (truncated)"),
            PacketKind::Image { payload_len, .. } => println!("  Size: {payload_len} bytes"),
            PacketKind::Mp2Audio { frame_len, estimated: false, .. } => {
                println!("  Expected size: {frame_len} bytes");
            },
            PacketKind::Mp2Audio { frame_len, estimated: true, .. } => {
                println!("  Extended rate index, guessing {frame_len} bytes");
            },
            PacketKind::Unknown { payload_len } => println!("  Guessing size: {payload_len} bytes"),
        }
    }
    match analysis.end {
        ScanEnd::EndOfStream => {},
        ScanEnd::Truncated => println!("... (truncated after {} packets)", analysis.packets.len()),
        ScanEnd::ResolutionFailed(failure) => println!("  Cannot determine packet size ({failure:?}), stopping analysis"),
        ScanEnd::Aborted => println!("  Analysis aborted"),
    }

    println!("\nTotal packets analyzed: {}\n", analysis.packets.len());
    println!("File size: {} bytes", analysis.stream_len);
}
