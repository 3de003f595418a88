//! Records a synthetic source into a texture voice and renders the voice's output into wav
//! files: one file per playback mode, or a single one when a mode is given.

use std::{
    f32::consts::PI,
    io,
    path::{Path, PathBuf},
};

use arg::{parse_args, Args};
use hound::{SampleFormat, WavSpec, WavWriter};

use textura::{Error, PlaybackMode, TextureConfig, TextureParameters, TextureVoice};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

const SAMPLE_RATE: u32 = 44100;
const BLOCK_SIZE: usize = 256;
const DEFAULT_SECONDS: f32 = 12.0;

// Seconds between two source notes and tap triggers.
const NOTE_INTERVAL: f32 = 0.5;

// -------------------------------------------------------------------------------------------------

/// Program arguments.
#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Target wav file. Gets suffixed with the mode's name when rendering all modes.
    output_path: Option<PathBuf>,
    #[arg(short = "m", long = "mode")]
    /// Render only the given mode: \"Granular\", \"Stretch\" or \"Looping\".
    mode: Option<PlaybackMode>,
    #[arg(short = "s", long = "seconds")]
    /// Length of the rendered files in seconds.
    seconds: Option<f32>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    /// By default \"debug\" in dev builds and \"warn\" in release builds.
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

/// Plucked, slowly detuning chord, retriggered every `NOTE_INTERVAL` seconds.
struct Source {
    phases: [f32; 3],
    frame: usize,
}

impl Source {
    const FREQUENCIES: [f32; 3] = [220.0, 277.18, 329.63];

    fn new() -> Self {
        Self {
            phases: [0.0; 3],
            frame: 0,
        }
    }

    fn next(&mut self) -> f32 {
        let time = self.frame as f32 / SAMPLE_RATE as f32;
        let note_time = time % NOTE_INTERVAL;
        let envelope = (-note_time * 6.0).exp();
        let detune = 1.0 + 0.01 * (2.0 * PI * 0.1 * time).sin();
        let mut output = 0.0;
        for (phase, frequency) in self.phases.iter_mut().zip(Self::FREQUENCIES) {
            output += (2.0 * PI * *phase).sin();
            *phase = (*phase + frequency * detune / SAMPLE_RATE as f32).fract();
        }
        self.frame += 1;
        0.25 * envelope * output
    }
}

// -------------------------------------------------------------------------------------------------

/// Parameter automation for the given time in seconds.
fn parameters_at(mode: PlaybackMode, time: f32, seconds: f32, trigger: bool) -> TextureParameters {
    let progress = time / seconds;
    let lfo = 0.5 + 0.5 * (2.0 * PI * 0.05 * time).sin();
    match mode {
        PlaybackMode::Granular => TextureParameters {
            position: 0.2 + 0.6 * lfo,
            size: 0.45,
            density: 0.1 + 0.85 * progress,
            texture: 0.7,
            pitch: if progress > 0.5 { 7.0 } else { 0.0 },
            stereo_spread: 0.6,
            freeze: progress > 0.75,
            trigger: false,
        },
        PlaybackMode::Stretch => TextureParameters {
            position: 0.1 + 0.4 * lfo,
            size: 0.6,
            texture: 0.4,
            pitch: -12.0 + 12.0 * progress,
            freeze: progress > 0.5,
            trigger,
            ..Default::default()
        },
        PlaybackMode::Looping => TextureParameters {
            position: 0.3 * lfo,
            size: 0.2,
            texture: 0.45,
            pitch: if progress > 0.75 { -5.0 } else { 0.0 },
            freeze: progress > 0.4,
            trigger,
            ..Default::default()
        },
    }
}

/// Render a single mode into a stereo, 32bit float wav file.
fn render(mode: PlaybackMode, seconds: f32, path: &Path) -> Result<(), Error> {
    let mut voice = TextureVoice::new(
        TextureConfig::default()
            .with_sample_rate(SAMPLE_RATE)
            .with_buffer_seconds(4.0),
    )?;
    voice.seed(0x7E27);
    voice.set_mode(mode);

    let spec = WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).map_err(io::Error::other)?;

    let mut source = Source::new();
    let mut input = vec![0.0; BLOCK_SIZE];
    let mut output_left = vec![0.0; BLOCK_SIZE];
    let mut output_right = vec![0.0; BLOCK_SIZE];

    let total_frames = (seconds * SAMPLE_RATE as f32) as usize;
    let trigger_interval = (NOTE_INTERVAL * SAMPLE_RATE as f32) as usize;
    let mut frame = 0;
    while frame < total_frames {
        let trigger = frame % trigger_interval < BLOCK_SIZE;
        let time = frame as f32 / SAMPLE_RATE as f32;
        let parameters = parameters_at(mode, time, seconds, trigger);

        input.iter_mut().for_each(|sample| *sample = source.next());
        voice.process(
            &input,
            &input,
            &parameters,
            &mut output_left,
            &mut output_right,
        );
        for (left, right) in output_left.iter().zip(&output_right) {
            writer.write_sample(*left).map_err(io::Error::other)?;
            writer.write_sample(*right).map_err(io::Error::other)?;
        }
        frame += BLOCK_SIZE;
    }
    writer.finalize().map_err(io::Error::other)?;
    Ok(())
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    // Parse optional arguments
    let args = parse_args::<Arguments>();

    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .init()
        .expect("Failed to set logger");

    let seconds = args.seconds.unwrap_or(DEFAULT_SECONDS).max(1.0);
    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("texture.wav"));

    let modes = match args.mode {
        Some(mode) => vec![(mode, output_path)],
        None => {
            let stem = output_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("texture")
                .to_string();
            [PlaybackMode::Granular, PlaybackMode::Stretch, PlaybackMode::Looping]
                .into_iter()
                .map(|mode| {
                    let name = format!("{stem}-{}.wav", mode.to_string().to_lowercase());
                    (mode, output_path.with_file_name(name))
                })
                .collect()
        }
    };

    for (mode, path) in modes {
        println!("Rendering {seconds:.1}s of {mode} texture into '{}'...", path.display());
        render(mode, seconds, &path)?;
    }
    Ok(())
}
