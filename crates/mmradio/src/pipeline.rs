//! Three-thread receive pipeline.
//!
//! The device thread (owned by the source) pushes I/Q blocks into the
//! source queue; the worker, on the caller's thread, runs one block at a
//! time through the Fs/4 shift, IF resampler and the selected decoder and
//! pushes audio into the output queue; the output thread drains that queue
//! into the sink. Coordination happens through the two queues and one
//! monotonic termination flag checked at every block boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use vaquero::buffer::DataBuffer;
use vaquero::dsp::fourth::FourthConverter;
use vaquero::dsp::moving_average::MovingAverage;
use vaquero::dsp::resampler::IfResampler;
use vaquero::dsp::{adjust_gain, DspBlock};
use vaquero::source::SdrSource;
use vaquero::{IqSample, Result, Sample, SampleBlock};

use crate::output::AudioOutput;
use crate::pps::PpsWriter;
use crate::{AmDecoder, FmDecoder, ModType, NbfmDecoder};

/// Audio output rate shared by every decoding chain.
pub const PCM_RATE: u32 = 48_000;

/// Nominal audio gain applied when the squelch is open (-6 dB).
const NOMINAL_AUDIO_GAIN: f64 = 0.5;

/// The per-mode decoding chain behind one dispatch surface.
pub enum Decoder {
    Fm(FmDecoder),
    Am(AmDecoder),
    Nbfm(NbfmDecoder),
}

impl Decoder {
    fn process(&mut self, samples_in: &[IqSample], audio: &mut SampleBlock) {
        match self {
            Decoder::Fm(d) => d.process(samples_in, audio),
            Decoder::Am(d) => d.process(samples_in, audio),
            Decoder::Nbfm(d) => d.process(samples_in, audio),
        }
    }

    fn if_rms(&self) -> f32 {
        match self {
            Decoder::Fm(d) => d.if_rms(),
            Decoder::Am(d) => d.if_rms(),
            Decoder::Nbfm(d) => d.if_rms(),
        }
    }

    /// Native input rate of the chain.
    pub fn internal_rate(&self) -> f64 {
        match self {
            Decoder::Fm(_) => FmDecoder::SAMPLE_RATE_IF,
            Decoder::Am(_) => AmDecoder::INTERNAL_RATE_PCM,
            Decoder::Nbfm(_) => NbfmDecoder::INTERNAL_RATE_PCM,
        }
    }
}

/// Static configuration of one pipeline run.
pub struct PipelineConfig {
    pub modtype: ModType,
    pub stereo: bool,
    pub quiet: bool,
    /// Linear IF squelch threshold; 0 keeps the squelch open.
    pub squelch_level: f64,
    /// Minimum buffered PCM samples per channel ahead of the sink.
    pub outputbuf_samples: usize,
    /// Frequency the tuner reports, for the ppm display.
    pub tuner_freq: f64,
    /// Effective IF sample rate after any ppm compensation.
    pub ifrate: f64,
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn mean_rms(samples: &[Sample]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum = 0.0;
    let mut sumsq = 0.0;
    for &s in samples {
        sum += s;
        sumsq += s * s;
    }
    let n = samples.len() as f64;
    (sum / n, (sumsq / n).sqrt())
}

/// Output thread body: drain audio blocks into the sink.
fn write_output_data(
    mut output: Box<dyn AudioOutput + Send>,
    buf: Arc<DataBuffer<Sample>>,
    stop: Arc<AtomicBool>,
    buf_minfill: usize,
) {
    while !stop.load(Ordering::Acquire) {
        if buf.queued_samples() == 0 {
            // The sink is consuming faster than we produce. Wait for the
            // buffer to return to its nominal level instead of spinning
            // awake on every block.
            buf.wait_buffer_fill(buf_minfill);
        }
        if buf.pull_end_reached() {
            break;
        }
        let Some(samples) = buf.pull() else { break };
        if let Err(e) = output.write(&samples) {
            error!("AudioOutput: {}", e);
            stop.store(true, Ordering::Release);
        }
    }
    if let Err(e) = output.finalize() {
        error!("AudioOutput: {}", e);
    }
}

/// Run the pipeline until the source ends or the termination flag is set.
#[allow(clippy::too_many_arguments)]
pub fn run(
    mut source: Box<dyn SdrSource>,
    mut decoder: Decoder,
    output: Box<dyn AudioOutput + Send>,
    mut pps: Option<PpsWriter>,
    config: PipelineConfig,
    stop_flag: Arc<AtomicBool>,
) -> Result<()> {
    let nchannel: usize = if config.stereo { 2 } else { 1 };

    let enable_fs_fourth_downconverter = !source.is_low_if();
    let mut fourth_downconverter = FourthConverter::new(false);
    let mut if_resampler = IfResampler::new(config.ifrate, decoder.internal_rate());

    let source_buffer: Arc<DataBuffer<IqSample>> = Arc::new(DataBuffer::new());
    let output_buffer: Arc<DataBuffer<Sample>> = Arc::new(DataBuffer::new());

    // Start reading from the device in its own thread.
    source.start(Arc::clone(&source_buffer), Arc::clone(&stop_flag))?;

    let output_thread = {
        let buf = Arc::clone(&output_buffer);
        let stop = Arc::clone(&stop_flag);
        let minfill = config.outputbuf_samples * nchannel;
        thread::spawn(move || write_output_data(output, buf, stop, minfill))
    };

    let mut audiosamples: SampleBlock = Vec::new();
    let mut inbuf_length_warning = false;
    let mut audio_level = 0.0f64;
    let mut if_level = 0.0f64;
    let mut got_stereo = false;
    let mut ppm_average = MovingAverage::new(100, 0.0);

    // Display cadence and startup discard, settled from the first block.
    let mut stat_rate: u64 = 0;
    let mut discarding_blocks: u64 = 0;

    let mut block_time = unix_time();
    let mut block: u64 = 0;

    // Main worker loop: one block at a time through the whole chain.
    while !stop_flag.load(Ordering::Acquire) {
        // Check for overflow of the source buffer.
        if !inbuf_length_warning && source_buffer.queued_samples() as f64 > 10.0 * config.ifrate {
            warn!("input buffer is growing (system too slow)");
            inbuf_length_warning = true;
        }

        let Some(iqsamples) = source_buffer.pull() else {
            break;
        };
        if iqsamples.is_empty() {
            continue;
        }

        if stat_rate == 0 {
            let total_decimation = config.ifrate / f64::from(PCM_RATE);
            let blocks_per_sec = iqsamples.len() as f64 / total_decimation;
            stat_rate = ((5120.0 / blocks_per_sec).round() as u64).max(1);
            discarding_blocks = stat_rate
                * match config.modtype {
                    ModType::Fm | ModType::Nbfm => 4,
                    _ => 2,
                };
        }

        let prev_block_time = block_time;
        block_time = unix_time();

        // Zero-IF devices leave the band center on DC; shift it away.
        let if_shifted_samples = if enable_fs_fourth_downconverter {
            fourth_downconverter.process(&iqsamples)
        } else {
            iqsamples
        };

        let if_samples = if_resampler.process(&if_shifted_samples);

        let if_exists = !if_samples.is_empty();
        let mut if_rms = 0.0f64;
        if if_exists {
            decoder.process(&if_samples, &mut audiosamples);
            if_rms = f64::from(decoder.if_rms());
            if_level = 0.75 * if_level + 0.25 * if_rms;
        } else {
            audiosamples.clear();
        }

        let audio_exists = !audiosamples.is_empty();
        if audio_exists {
            let (_, audio_rms) = mean_rms(&audiosamples);
            audio_level = 0.95 * audio_level + 0.05 * audio_rms;

            // Nominal volume while the squelch is open, silence otherwise.
            let gain = if if_rms >= config.squelch_level {
                NOMINAL_AUDIO_GAIN
            } else {
                0.0
            };
            adjust_gain(&mut audiosamples, gain);
        }

        match &decoder {
            // The minus sign shows the correction to make, not the one made.
            Decoder::Fm(fm) => {
                ppm_average.feed((fm.tuning_offset() / config.tuner_freq) * -1.0e6)
            }
            Decoder::Nbfm(nbfm) => {
                ppm_average.feed((nbfm.tuning_offset() / config.tuner_freq) * -1.0e6)
            }
            Decoder::Am(_) => {}
        }

        if !config.quiet {
            let if_level_db = 20.0 * if_level.log10();
            let audio_level_db = 20.0 * audio_level.log10() + 3.01;
            let buflen_sec =
                output_buffer.queued_samples() as f64 / nchannel as f64 / f64::from(PCM_RATE);

            let mut stereo_change = false;
            if let Decoder::Fm(fm) = &decoder {
                stereo_change = fm.stereo_detected() != got_stereo;
                if stereo_change {
                    got_stereo = fm.stereo_detected();
                    if got_stereo {
                        eprintln!();
                        info!("got stereo signal, pilot level = {:.7}", fm.pilot_level());
                    } else {
                        eprintln!();
                        info!("lost stereo signal");
                    }
                }
            }

            if stereo_change || (block % stat_rate == 0 && block > discarding_blocks) {
                match &decoder {
                    Decoder::Fm(_) | Decoder::Nbfm(_) => {
                        eprint!(
                            "\rblk={:8}:ppm={:+6.2}:IF={:+6.1}dB:AF={:+6.1}dB:buf={:.2}s",
                            block,
                            ppm_average.average(),
                            if_level_db,
                            audio_level_db,
                            buflen_sec
                        );
                    }
                    Decoder::Am(am) => {
                        let agc_gain_db = 20.0 * f64::from(am.if_agc_current_gain()).log10();
                        eprint!(
                            "\rblk={:8}:IF={:+6.1}dB:AGC={:+6.1}dB:AF={:+6.1}dB:buf={:.2}s",
                            block, if_level_db, agc_gain_db, audio_level_db, buflen_sec
                        );
                    }
                }
                use std::io::Write;
                let _ = std::io::stderr().flush();
            }
        }

        // Write pulse-per-second markers.
        let mut pps_failed = false;
        if let Some(writer) = pps.as_mut() {
            let result = match &decoder {
                Decoder::Fm(fm) => fm.pps_events().iter().try_for_each(|ev| {
                    let ts = prev_block_time + ev.block_position * (block_time - prev_block_time);
                    writer.write_fm_event(ev, ts)
                }),
                _ if block % (stat_rate * 10) == 0 => {
                    writer.write_block_marker(block, prev_block_time)
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                error!("{}", e);
                pps_failed = true;
            }
        }
        if pps_failed {
            pps = None;
        }

        // Throw away the first blocks; the IF filters are still starting up
        // and their output is noisy.
        if block > discarding_blocks && audio_exists {
            output_buffer.push(std::mem::take(&mut audiosamples));
        }

        block += 1;
    }

    if !config.quiet {
        eprintln!();
    }
    info!("shutting down");

    // Join background threads in reverse acquisition order.
    source.stop();
    output_buffer.push_end();
    output_thread
        .join()
        .map_err(|_| vaquero::Error::sink("output thread panicked"))?;

    Ok(())
}
