//! PTY (console) channel. Reads lines from stdin, streams replies to stdout.
//!
//! Stdin is just one producer on the [`InputBridge`]; recognized speech can
//! arrive on the same bridge. Runs until the `shutdown` token is cancelled
//! (Ctrl-C), `/quit` is typed, or every input sender is gone.
//!
//! Commands: `/new`, `/status`, `/history`, `/help`, `/quit`.

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{InputBridge, InputSender};
use crate::error::AppError;
use crate::orchestrator::Orchestrator;
use crate::subsystems::voice::SpeechOutput;

const HELP: &str = "\
commands:
  /new      start a new conversation
  /status   backend readiness and last error
  /history  transcript of this conversation
  /quit     leave";

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct ConsoleChannel {
    orchestrator: Orchestrator,
    speech: Box<dyn SpeechOutput>,
}

impl ConsoleChannel {
    pub fn new(orchestrator: Orchestrator, speech: Box<dyn SpeechOutput>) -> Self {
        Self { orchestrator, speech }
    }

    /// Drive the conversation loop against stdout.
    pub async fn run(self, input: InputBridge, shutdown: CancellationToken) -> Result<(), AppError> {
        info!("console channel started, type a message and press Enter. Ctrl-C to quit.");
        println!("─────────────────────────────────");
        println!(" Orchid console  (/help, Ctrl-C to quit)");
        println!("─────────────────────────────────");
        let mut out = tokio::io::stdout();
        self.run_with(input, shutdown, &mut out).await
    }

    async fn run_with<W>(&self, mut input: InputBridge, shutdown: CancellationToken, out: &mut W) -> Result<(), AppError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            out.write_all(b"> ").await?;
            out.flush().await?;

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    out.write_all(b"\n[console] shutdown signal received\n").await?;
                    info!("console channel shutting down");
                    break;
                }

                line = input.recv() => {
                    let Some(line) = line else {
                        info!("console input closed");
                        break;
                    };
                    if self.handle_line(&line, out).await? == Flow::Quit {
                        break;
                    }
                }
            }
        }
        out.flush().await?;
        Ok(())
    }

    async fn handle_line<W>(&self, line: &str, out: &mut W) -> Result<Flow, AppError>
    where
        W: AsyncWrite + Unpin,
    {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        debug!(input = %line, "console received line");

        match line {
            "/quit" | "/exit" => return Ok(Flow::Quit),
            "/help" => write_line(out, HELP).await?,
            "/new" => {
                self.orchestrator.start_new_session();
                let session = self.orchestrator.session();
                write_line(out, &format!("[new session {}]", session.id())).await?;
            }
            "/status" => {
                let mut text = format!("[status] {}", self.orchestrator.status());
                if let Some(err) = self.orchestrator.last_error() {
                    text.push_str(&format!(" (last error: {err})"));
                }
                write_line(out, &text).await?;
            }
            "/history" => {
                let session = self.orchestrator.session();
                if session.is_empty() {
                    write_line(out, "[empty session]").await?;
                } else {
                    out.write_all(session.to_markdown().as_bytes()).await?;
                }
            }
            text => self.reply(text, out).await?,
        }
        Ok(Flow::Continue)
    }

    async fn reply<W>(&self, text: &str, out: &mut W) -> Result<(), AppError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunks = match self.orchestrator.generate_stream(text, &[]).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "reply failed");
                return write_line(out, self.orchestrator.language().failure_message()).await;
            }
        };

        let mut spoken = String::new();
        while let Some(chunk) = chunks.next().await {
            out.write_all(chunk.as_bytes()).await?;
            out.flush().await?;
            spoken.push_str(&chunk);
        }
        out.write_all(b"\n").await?;
        self.speech.speak(&spoken);
        Ok(())
    }
}

async fn write_line<W>(out: &mut W, text: &str) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

/// Forward stdin lines into the bridge until EOF or shutdown.
pub fn spawn_stdin_reader(sender: InputSender, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        sender.submit(line);
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin read error: {e}");
                        break;
                    }
                },
            }
        }
    })
}
