use anyhow::{bail, Context};
use log::info;
use sampler_engine::bank::{SampleBackend, WavBank};
use sampler_engine::convert::scale_from_gain;
use sampler_engine::decoder;
use sampler_engine::engine::{AudioEngine, EngineOpts, SynthMode};
use sampler_engine::note::Pitch;
use sampler_engine::sink::{AudioSink, CpalSink};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

const SAMPLE_RATE: u32 = 44_100;
const BLOCK_FRAMES: usize = 4096;

/// Seconds to keep playing past the last note-off so release tails finish.
const TAIL_SECONDS: f64 = 1.0;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "player",
    about = "Plays a Standard MIDI File through a small software synthesizer"
)]
struct Opt {
    /// The MIDI file to play
    #[structopt(parse(from_os_str))]
    midi_path: PathBuf,

    /// Play through a WAV sample bank instead of the oscillator voices
    #[structopt(short = "b", long = "bank", parse(from_os_str))]
    bank_path: Option<PathBuf>,

    /// MIDI key at which the sample bank plays unchanged
    #[structopt(long = "root", default_value = "60")]
    root: u8,

    /// Master gain in dB
    #[structopt(short = "g", long = "gain", default_value = "0")]
    gain: f32,

    /// Start playback this many seconds in
    #[structopt(short = "s", long = "seek")]
    seek: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let bytes = std::fs::read(&opt.midi_path)
        .with_context(|| format!("failed to read {}", opt.midi_path.display()))?;
    let tracks = decoder::decode(&bytes)
        .with_context(|| format!("failed to decode {}", opt.midi_path.display()))?;

    let mut engine = AudioEngine::new(EngineOpts {
        sample_rate: SAMPLE_RATE,
        block_frames: BLOCK_FRAMES,
        gain: scale_from_gain(opt.gain),
        ..EngineOpts::default()
    });
    engine.load(tracks);

    if let Some(bank_path) = &opt.bank_path {
        let mut bank = WavBank::new(SAMPLE_RATE, Pitch(opt.root));
        if !bank.load_bank(bank_path) {
            bail!("failed to load sample bank {}", bank_path.display());
        }
        engine.set_backend(Box::new(bank));
        engine.set_mode(SynthMode::SampleBank);
    }

    let transport = engine.transport();
    let duration = engine.duration();
    info!("{} plays for {:.2}s", opt.midi_path.display(), duration);

    engine.start()?;
    if let Some(time) = opt.seek {
        engine.seek(time);
    }

    // The generation thread renders blocks as fast as the device accepts
    // them; the main thread only watches the transport.
    let generator = thread::spawn(move || -> anyhow::Result<()> {
        let mut sink = CpalSink::connect_default(SAMPLE_RATE, BLOCK_FRAMES)?;
        while let Some(block) = engine.render_block() {
            sink.write_block(block)?;
            if let Some(time) = sink.pending_seek() {
                engine.seek(time);
            }
        }
        Ok(())
    });

    while transport.is_playing() {
        print!("\rtime: {:6.2}s / {:.2}s", transport.time(), duration);
        std::io::stdout().flush().ok();
        if transport.time() >= duration + TAIL_SECONDS {
            transport.request_stop();
        }
        thread::sleep(Duration::from_millis(100));
    }
    println!();

    match generator.join() {
        Ok(result) => result?,
        Err(_) => bail!("playback thread panicked"),
    }

    println!("playback finished");
    Ok(())
}
