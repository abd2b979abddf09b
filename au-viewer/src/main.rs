//! Feeds a raw Annex B elementary-stream file through the access-unit
//! parser in bounded chunks, printing each emitted access unit and any
//! decoder-configuration change. Handy for eyeballing how a stream
//! splits before wiring it to a decoder.

use estream::{AuParser, Codec, Pulled};
use failure::Error;
use log::info;
use std::io::Read;
use std::str::FromStr;
use structopt::StructOpt;

#[derive(StructOpt)]
struct Opt {
    /// Raw Annex B elementary stream file.
    #[structopt(long, parse(from_os_str))]
    file: std::path::PathBuf,

    /// Stream codec: h264 or h265.
    #[structopt(long, default_value = "h264")]
    codec: Codec,

    /// Bytes fed to the parser per call, to exercise partial-input
    /// handling the way a streaming caller would.
    #[structopt(long, default_value = "4096")]
    chunk: usize,

    /// Hex-dump the head of each access unit.
    #[structopt(long)]
    dump: bool,
}

fn init_logging() -> mylog::Handle {
    let h = mylog::Builder::new()
        .set_format(::std::env::var("ANALYTICS_FORMAT")
                    .map_err(|_| ())
                    .and_then(|s| mylog::Format::from_str(&s))
                    .unwrap_or(mylog::Format::Google))
        .set_spec(&::std::env::var("ANALYTICS_LOG").unwrap_or("info".to_owned()))
        .build();
    h.clone().install().unwrap();
    h
}

fn main() {
    let _h = init_logging();
    if let Err(e) = run() {
        eprintln!("Exiting due to error: {}", e);
        std::process::exit(1);
    }
}

fn print_au(index: usize, au: &estream::AccessUnit, dump: bool) {
    if let Some(ref c) = au.new_config {
        println!(
            "config: {}x{} profile {} level {} {}-bit {:?} {:?} {}/{} fps",
            c.width,
            c.height,
            c.profile,
            c.level,
            c.bit_depth,
            c.chroma,
            c.scan,
            c.frame_rate_num,
            c.frame_rate_den
        );
    }
    println!(
        "au {:5}: {:7} bytes{}",
        index,
        au.data.len(),
        if au.is_keyframe { " [key]" } else { "" }
    );
    if dump {
        use pretty_hex::PrettyHex;
        let head = &au.data[..std::cmp::min(au.data.len(), 64)];
        println!("{:?}", head.hex_dump());
    }
}

fn run() -> Result<(), Error> {
    let opt = Opt::from_args();
    if opt.chunk == 0 {
        failure::bail!("--chunk must be nonzero");
    }
    let mut f = std::fs::File::open(&opt.file)?;
    let mut parser = AuParser::new(opt.codec);
    let mut buf = vec![0u8; opt.chunk];
    let mut count = 0usize;
    let mut key_count = 0usize;
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut input: &[u8] = &buf[..n];
        loop {
            match parser.get_au(input, false)? {
                Pulled::Au(au) => {
                    print_au(count, &au, opt.dump);
                    count += 1;
                    key_count += au.is_keyframe as usize;
                    input = &[];
                }
                Pulled::NeedMore => break,
                Pulled::End(_) => unreachable!("eos not signalled yet"),
            }
        }
    }
    loop {
        match parser.get_au(&[], true)? {
            Pulled::Au(au) | Pulled::End(Some(au)) => {
                print_au(count, &au, opt.dump);
                count += 1;
                key_count += au.is_keyframe as usize;
            }
            Pulled::End(None) => break,
            Pulled::NeedMore => unreachable!("eos never needs more"),
        }
    }
    info!("{} access units ({} keyframes)", count, key_count);
    Ok(())
}
