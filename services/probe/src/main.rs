//! Manual test harness for the bridge: streams the default microphone to a
//! running bridge instance and plays returned audio through the default
//! speaker. Lines typed on stdin are sent as `text_input` control frames.
//!
//! Not part of the service; a convenience for poking a deployment by ear.

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use futures_util::{SinkExt, StreamExt};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{error, warn};

/// Microphone capture rate the bridge expects.
const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Playback rate of the audio the bridge returns.
const OUTPUT_SAMPLE_RATE: u32 = 24_000;
const MIC_CHUNK_SAMPLES: usize = 512;

#[derive(Parser)]
#[command(name = "probe", about = "Microphone/speaker probe for the live bridge")]
struct Args {
    /// WebSocket URL of a running bridge.
    #[arg(long, default_value = "ws://localhost:8080/ws")]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    // Outgoing frames from both the mic callback and stdin funnel through
    // one channel so the socket has a single writer.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    // Speaker buffer: the receive loop produces, the output callback consumes.
    let playback = HeapRb::<i16>::new(OUTPUT_SAMPLE_RATE as usize * 10);
    let (mut playback_tx, mut playback_rx) = playback.split();

    let host = cpal::default_host();
    let mic = host
        .default_input_device()
        .context("no default input device")?;
    let speaker = host
        .default_output_device()
        .context("no default output device")?;

    let mic_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(INPUT_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Fixed(MIC_CHUNK_SAMPLES as u32),
    };
    let mic_out = out_tx.clone();
    let mic_stream = mic.build_input_stream(
        &mic_config,
        move |data: &[i16], _| {
            let mut bytes = Vec::with_capacity(data.len() * 2);
            for sample in data {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            let _ = mic_out.send(Message::Binary(bytes.into()));
        },
        |err| error!(error = %err, "mic stream error"),
        None,
    )?;

    let speaker_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(OUTPUT_SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    let speaker_stream = speaker.build_output_stream(
        &speaker_config,
        move |data: &mut [i16], _| {
            for sample in data.iter_mut() {
                *sample = playback_rx.try_pop().unwrap_or(0);
            }
        },
        |err| error!(error = %err, "speaker stream error"),
        None,
    )?;

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(&args.url)
        .await
        .context("connection failed")?;
    println!("Connected. Start speaking; type a line to send it as text input.");
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    mic_stream.play()?;
    speaker_stream.play()?;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = ws_tx.send(msg).await {
                error!(error = %e, "send failed");
                break;
            }
        }
    });

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(pcm))) => {
                    for chunk in pcm.chunks_exact(2) {
                        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                        if playback_tx.try_push(sample).is_err() {
                            warn!("playback buffer full, dropping audio");
                            break;
                        }
                    }
                }
                Some(Ok(Message::Text(text))) => println!("<< {text}"),
                Some(Ok(Message::Close(frame))) => {
                    println!("Server closed the connection: {frame:?}");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "receive failed");
                    break;
                }
                None => break,
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    let control = serde_json::json!({"type": "text_input", "content": line.trim()});
                    let _ = out_tx.send(Message::Text(control.to_string().into()));
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
        }
    }

    send_task.abort();
    Ok(())
}
