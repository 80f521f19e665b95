//! Multimode FM/AM broadcast receiver.
//!
//! Turns the I/Q stream of an SDR front end into audio: wideband FM with
//! stereo decoding and pulse-per-second timing, the AM family (AM, DSB,
//! USB, LSB, CW) and narrow-band FM. Audio goes to raw files, a WAV
//! container or the default sound device.
//!
//! # Usage examples
//!
//! ## Decode an FM recording into a WAV file
//! ```bash
//! mmradio -m fm -t filesource -c filename=capture.iq,srate=384000,freq=93.7M -W out.wav
//! ```
//!
//! ## Narrow AM with squelch, raw 16-bit output to stdout
//! ```bash
//! mmradio -m am -f narrow -l 40 -t filesource -c filename=shortwave.iq,srate=48000 -R -
//! ```

use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use vaquero::dsp::fir::complex_bandpass_taps;
use vaquero::source::{self, DevType};
use vaquero::{Error, IqSample, Result};

use mmradio::output::{
    samples_to_float32, samples_to_int16, AudioOutput, PlaybackOutput, RawAudioOutput,
    WavAudioOutput,
};
use mmradio::pipeline::{self, Decoder, PipelineConfig, PCM_RATE};
use mmradio::pps::PpsWriter;
use mmradio::{AmDecoder, FilterType, FmDecoder, ModType, NbfmDecoder};

#[derive(Parser, Debug)]
#[command(author, version, about = "Software multimode radio for SDR front ends", long_about = None)]
struct Args {
    /// Modulation type: fm, am, dsb, usb, lsb, cw or nbfm
    #[arg(short = 'm', long = "modtype", default_value = "fm")]
    modtype: ModType,

    /// Device type: rtlsdr, airspy, airspyhf or filesource
    #[arg(short = 't', long = "devtype")]
    devtype: DevType,

    /// Comma separated key=value configuration pairs, or just key for switches
    #[arg(short = 'c', long = "config", default_value = "")]
    config: String,

    /// Device index, 'list' to show the device list
    #[arg(short = 'd', long = "dev", default_value = "0")]
    dev: String,

    /// Disable stereo decoding
    #[arg(short = 'M', long = "mono")]
    mono: bool,

    /// Write audio data as raw S16_LE samples ('-' for stdout)
    #[arg(short = 'R', long = "raw")]
    raw: Option<String>,

    /// Write audio data as raw FLOAT_LE samples ('-' for stdout)
    #[arg(short = 'F', long = "float")]
    float: Option<String>,

    /// Write audio data to a .WAV file
    #[arg(short = 'W', long = "wav")]
    wav: Option<String>,

    /// Play audio on the default sound device ('-' keeps the default)
    #[arg(short = 'P', long = "play")]
    play: Option<String>,

    /// Write pulse-per-second timestamps ('-' for stdout)
    #[arg(short = 'T', long = "pps")]
    pps: Option<String>,

    /// Audio buffer size in seconds
    #[arg(short = 'b', long = "buffer", default_value_t = 1.0)]
    buffer: f64,

    /// Shift pilot phase for the Quadrature Multipath Monitor
    /// (ignored under mono)
    #[arg(short = 'X', long = "pilotshift")]
    pilotshift: bool,

    /// Set deemphasis to 75 microseconds (default: 50)
    #[arg(short = 'U', long = "usa")]
    usa: bool,

    /// Filter type: wide, default, medium or narrow
    #[arg(short = 'f', long = "filtertype", default_value = "default")]
    filtertype: FilterType,

    /// IF squelch level in dB below full scale
    #[arg(short = 'l', long = "squelch")]
    squelch: Option<f64>,

    /// Enable the FM multipath filter with this many stages
    #[arg(short = 'E', long = "multipathfilter")]
    multipath: Option<usize>,

    /// IF sample rate offset in ppm (affects output pitch and timing)
    #[arg(short = 'r', long = "ifrateppm", default_value_t = 0.0, allow_hyphen_values = true)]
    ifrateppm: f64,

    /// Quiet mode: no per-block statistics
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

/// FM IF prefilter at the 384 kHz demodulator rate.
fn fm_filter_coeff(filtertype: FilterType) -> Option<Vec<IqSample>> {
    let rate = FmDecoder::SAMPLE_RATE_IF;
    match filtertype {
        // The full band after rate conversion needs no extra shaping.
        FilterType::Default | FilterType::Wide => None,
        FilterType::Medium => Some(complex_bandpass_taps(-156_000.0, 156_000.0, rate, 127)),
        FilterType::Narrow => Some(complex_bandpass_taps(-121_000.0, 121_000.0, rate, 127)),
    }
}

/// Band-pass for the AM family, one-sided for SSB work.
fn am_filter_coeff(filtertype: FilterType, modtype: ModType) -> Vec<IqSample> {
    let rate = AmDecoder::INTERNAL_RATE_PCM;
    let width = match filtertype {
        FilterType::Wide => 9_000.0,
        FilterType::Default => 6_000.0,
        FilterType::Medium => 4_500.0,
        FilterType::Narrow => 3_000.0,
    };
    let (low, high) = match modtype {
        ModType::Am | ModType::Dsb => (-width, width),
        ModType::Usb => (0.0, width),
        ModType::Lsb => (-width, 0.0),
        // Narrow slice around the carrier; the BFO supplies the pitch.
        ModType::Cw => (-500.0, 500.0),
        ModType::Fm | ModType::Nbfm => unreachable!("not an AM-family mode"),
    };
    complex_bandpass_taps(low, high, rate, 255)
}

/// NBFM channel filter and matching deviation.
fn nbfm_filter_coeff(filtertype: FilterType) -> (Vec<IqSample>, f64) {
    let rate = NbfmDecoder::INTERNAL_RATE_PCM;
    let (width, freq_dev) = match filtertype {
        FilterType::Wide => (20_000.0, NbfmDecoder::FREQ_DEV_WIDE),
        FilterType::Default => (10_000.0, NbfmDecoder::FREQ_DEV_NORMAL),
        FilterType::Medium => (8_000.0, NbfmDecoder::FREQ_DEV_NORMAL),
        FilterType::Narrow => (6_250.0, NbfmDecoder::FREQ_DEV_NORMAL),
    };
    (complex_bandpass_taps(-width, width, rate, 127), freq_dev)
}

fn run(args: Args) -> Result<()> {
    let modtype = args.modtype;

    // Every mode but FM is mono, and pilot shift only means something in
    // a stereo decode.
    let stereo = !args.mono && modtype == ModType::Fm;
    let pilot_shift = args.pilotshift && stereo;
    let nchannel = if stereo { 2 } else { 1 };

    let squelch_level = match args.squelch {
        Some(db) if !(0.0..=150.0).contains(&db) => {
            return Err(Error::config("squelch level must be between 0 and 150 dB"));
        }
        Some(db) => 10f64.powf(-db / 20.0),
        None => 0.0,
    };

    if args.ifrateppm.abs() > 1_000_000.0 {
        return Err(Error::config("IF rate offset out of range (+-1000000 ppm)"));
    }
    if args.buffer < 0.0 {
        return Err(Error::config("buffer length must not be negative"));
    }
    if args.multipath == Some(0) {
        return Err(Error::config("multipath filter needs at least one stage"));
    }
    let multipath_stages = args.multipath.unwrap_or(0);

    // Resolve the device.
    let devidx: i64 = args.dev.parse().unwrap_or(-1);
    let devnames = source::device_names(args.devtype);
    if devidx < 0 || devidx as usize >= devnames.len() {
        eprintln!("Found {} device(s):", devnames.len());
        for (i, name) in devnames.iter().enumerate() {
            eprintln!("{:2}: {}", i, name);
        }
        return Err(Error::device("no usable device selected"));
    }
    info!("using device {}: {}", devidx, devnames[devidx as usize]);

    let mut source = source::open(args.devtype, devidx as usize)?;
    source.configure(&args.config)?;

    let freq = source.configured_frequency();
    let tuner_freq = source.frequency();
    if (tuner_freq - freq).abs() > f64::EPSILON {
        info!(
            "tuned for {:.7} MHz, device tuned for {:.7} MHz",
            freq * 1.0e-6,
            tuner_freq * 1.0e-6
        );
    } else {
        info!("tuned for {:.7} MHz", freq * 1.0e-6);
    }

    // IF rate compensation if requested.
    let mut ifrate = source.sample_rate();
    if args.ifrateppm != 0.0 {
        ifrate *= 1.0 + args.ifrateppm / 1.0e6;
        info!("IF sample rate shifted by {} ppm", args.ifrateppm);
    }

    // Prepare the decoder for the selected modulation.
    let deemphasis = if args.usa {
        FmDecoder::DEFAULT_DEEMPHASIS_NA
    } else {
        FmDecoder::DEFAULT_DEEMPHASIS_EU
    };
    let decoder = match modtype {
        ModType::Fm => Decoder::Fm(FmDecoder::new(
            fm_filter_coeff(args.filtertype),
            stereo,
            deemphasis,
            pilot_shift,
            multipath_stages,
        )),
        ModType::Nbfm => {
            let (coeff, freq_dev) = nbfm_filter_coeff(args.filtertype);
            Decoder::Nbfm(NbfmDecoder::new(coeff, freq_dev))
        }
        _ => Decoder::Am(AmDecoder::new(
            am_filter_coeff(args.filtertype, modtype),
            modtype,
        )),
    };

    info!("decoding modulation type: {}", modtype);
    info!(
        "IF sample rate: {} Hz, IF decimation: / {:.6}",
        ifrate,
        ifrate / decoder.internal_rate()
    );
    info!(
        "demodulator rate: {} Hz, audio rate: {} Hz",
        decoder.internal_rate(),
        PCM_RATE
    );
    if modtype == ModType::Fm {
        info!("FM demodulator deemphasis: {} us", deemphasis);
        if multipath_stages > 0 {
            info!("FM IF multipath filter enabled, stages: {}", multipath_stages);
        }
    }
    if squelch_level > 0.0 {
        info!("IF squelch level: {:.2} dB", 20.0 * squelch_level.log10());
    }

    // Audio buffer length in samples per channel, floor of 480.
    let outputbuf_samples = ((args.buffer * f64::from(PCM_RATE)) as usize).max(480);
    info!(
        "output buffer length: {:.3} s",
        outputbuf_samples as f64 / f64::from(PCM_RATE)
    );

    // Prepare the output writer.
    let selected_outputs = [&args.raw, &args.float, &args.wav, &args.play]
        .iter()
        .filter(|o| o.is_some())
        .count();
    if selected_outputs > 1 {
        return Err(Error::config("choose a single output mode"));
    }

    let mut _playback_guard = None;
    let output: Box<dyn AudioOutput + Send> = if let Some(filename) = &args.float {
        info!("writing raw 32-bit float little-endian audio samples to '{}'", filename);
        Box::new(RawAudioOutput::new(filename, samples_to_float32)?)
    } else if let Some(filename) = &args.wav {
        info!("writing audio samples to '{}'", filename);
        Box::new(WavAudioOutput::new(filename, PCM_RATE, stereo)?)
    } else if let Some(device) = &args.play {
        if device != "-" {
            warn!("output device selection is not supported, using the default");
        }
        let (playback, guard) = PlaybackOutput::start(nchannel, PCM_RATE as usize)?;
        _playback_guard = Some(guard);
        Box::new(playback)
    } else {
        let filename = args.raw.clone().unwrap_or_else(|| "-".to_string());
        info!(
            "writing raw 16-bit integer little-endian audio samples to '{}'",
            filename
        );
        Box::new(RawAudioOutput::new(&filename, samples_to_int16)?)
    };

    // Open the PPS writer.
    let pps = match &args.pps {
        Some(filename) => {
            info!("writing pulse-per-second markers to '{}'", filename);
            Some(PpsWriter::open(filename, modtype)?)
        }
        None => None,
    };

    // Catch Ctrl-C and SIGTERM through the shared termination flag.
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop_flag);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
        })
        .map_err(|e| Error::config(format!("can not install signal handler ({})", e)))?;
    }

    let config = PipelineConfig {
        modtype,
        stereo,
        quiet: args.quiet,
        squelch_level,
        outputbuf_samples,
        tuner_freq,
        ifrate,
    };

    pipeline::run(source, decoder, output, pps, config, stop_flag)
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            exit(1);
        }
        // Help and version displays are clean exits.
        Err(e) => e.exit(),
    };

    let log_level = if args.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(args) {
        error!("{}", e);
        exit(1);
    }
}
