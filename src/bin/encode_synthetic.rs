use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use h264_live::{Dimensions, EncodeError, EncodeSession, EncoderSettings, PacketSink, RawFrame};

#[derive(Parser, Debug)]
#[command(about = "Encode synthetic YUV frames and dump the H.264 bitstream")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long, default_value_t = 120)]
    frames: usize,
    #[arg(long, default_value_t = 30)]
    fps: i32,
    #[arg(long, default_value = "encode_synthetic.h264")]
    output: PathBuf,
    #[arg(long, default_value_t = false)]
    require_hardware: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let dims = Dimensions::new(args.width, args.height)
        .context("width and height must be non-zero")?;
    let mut settings = EncoderSettings::new(dims, args.fps);
    settings.require_hardware = args.require_hardware;

    let bitstream = Rc::new(RefCell::new(Vec::new()));
    let sink_buffer = Rc::clone(&bitstream);
    let sink: PacketSink = Box::new(move |packet| {
        sink_buffer.borrow_mut().extend_from_slice(&packet.data);
    });

    let mut session = EncodeSession::new(settings, sink);
    for index in 0..args.frames {
        let frame = synthetic_frame(dims, index);
        match session.push_frame(frame) {
            Ok(_) => {}
            Err(EncodeError::UnsupportedConfig(message)) => {
                eprintln!("skip: {message}");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
    session.flush()?;

    fs::write(&args.output, bitstream.borrow().as_slice())
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!("{} output={}", session.summary(), args.output.display());
    Ok(())
}

/// Moving luma gradient over a flat chroma field; enough temporal change to
/// keep the rate control honest.
fn synthetic_frame(dims: Dimensions, index: usize) -> RawFrame {
    let width = dims.width.get() as usize;
    let height = dims.height.get() as usize;
    let chroma = width.div_ceil(2) * height.div_ceil(2);

    let mut y = vec![0u8; width * height];
    for (row, line) in y.chunks_mut(width).enumerate() {
        for (col, sample) in line.iter_mut().enumerate() {
            *sample = ((col + row + index * 4) & 0xff) as u8;
        }
    }

    RawFrame::new(dims, index as i64, y, vec![0x60; chroma], vec![0xa0; chroma])
}
