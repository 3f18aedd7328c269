use anyhow::Result;
use clap::{Parser, Subcommand};
use meeting_stream::{
    Config, MeetingApi, SessionController, SessionError, WavCapture, WebSocketDialer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meeting-stream", about = "Live meeting transcription client")]
struct Cli {
    /// Config file (defaults are used when absent)
    #[arg(short, long, default_value = "config/meeting-stream")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a WAV file as a live meeting and print transcripts
    Record {
        /// WAV file to replay as the microphone feed
        input: PathBuf,
    },
    /// List recorded meetings
    List,
    /// Show one meeting with its stored transcript
    Show { id: u64 },
    /// Delete a meeting
    Delete { id: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config);

    match cli.command {
        Commands::Record { input } => record(&config, &input).await,
        Commands::List => list(&config).await,
        Commands::Show { id } => show(&config, id).await,
        Commands::Delete { id } => delete(&config, id).await,
    }
}

async fn record(config: &Config, input: &Path) -> Result<()> {
    let capture = WavCapture::open(input, config.audio.chunk_ms)?;
    let controller = SessionController::new(
        config.session_config(),
        Box::new(capture),
        Arc::new(WebSocketDialer),
    );

    let mut transcripts = controller.subscribe_transcripts();
    let mut errors = controller.subscribe_errors();

    let session_id = controller.start_session().await?;
    info!("Recording meeting {session_id}, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }

            segment = transcripts.recv() => match segment {
                Ok(segment) => println!("{}", segment.content),
                Err(RecvError::Lagged(n)) => warn!("Dropped {n} transcript segments"),
                Err(RecvError::Closed) => break,
            },

            error = errors.recv() => if let Ok(error) = error {
                eprintln!("error: {error}");
                if matches!(error, SessionError::ReconnectExhausted { .. }) {
                    break;
                }
            },
        }
    }

    controller.stop_session().await?;

    let stats = controller.stats().await;
    info!(
        "Session closed after {:.1}s, {} chunks sent, {} transcript segments",
        stats.duration_secs, stats.chunks_sent, stats.transcript_segments
    );

    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let api = MeetingApi::new(&config.server.api_url);

    let meetings = api.list_meetings().await?;
    if meetings.is_empty() {
        println!("No meetings recorded yet");
        return Ok(());
    }

    for meeting in meetings {
        println!(
            "{:>5}  {:<10}  {}  {}",
            meeting.id,
            format!("{:?}", meeting.status).to_lowercase(),
            meeting.start_time,
            meeting.title
        );
    }

    Ok(())
}

async fn show(config: &Config, id: u64) -> Result<()> {
    let api = MeetingApi::new(&config.server.api_url);

    let meeting = api.get_meeting(id).await?;
    println!("{} ({:?})", meeting.title, meeting.status);
    println!("started: {}", meeting.start_time);
    if let Some(end_time) = &meeting.end_time {
        println!("ended:   {end_time}");
    }
    if let Some(summary) = &meeting.summary {
        println!("\n{summary}\n");
    }

    let speakers = api.speakers(id).await.unwrap_or_default();
    let speaker_name = |speaker_id: Option<i64>| -> String {
        speaker_id
            .and_then(|sid| speakers.iter().find(|s| s.id == sid))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| "?".to_string())
    };

    for line in api.transcripts(id).await? {
        println!("[{}] {}: {}", line.timestamp, speaker_name(line.speaker_id), line.content);
    }

    Ok(())
}

async fn delete(config: &Config, id: u64) -> Result<()> {
    let api = MeetingApi::new(&config.server.api_url);
    api.delete_meeting(id).await?;
    println!("Meeting {id} deleted");
    Ok(())
}
