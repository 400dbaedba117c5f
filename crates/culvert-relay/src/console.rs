//! Operator console: command input and the interactive session picker
//!
//! One task owns stdin. Ordinary lines are parsed as commands and handed
//! to the control loop; while a selection prompt is outstanding, the next
//! lines answer the prompt instead. That keeps a single reader on the
//! terminal no matter how many tasks ask for a pick at once.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::display_id;
use crate::select::{PickError, SessionPicker};

/// Discrete operator commands delivered to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run a fresh selection round, replacing the bound session
    Select,
    /// Print the registered sessions
    List,
    /// Shut the relay down
    Quit,
}

/// Selection oracle backed by the console task
///
/// Cloneable handle; consulting it parks the caller until the operator
/// answers the prompt or input is exhausted.
#[derive(Clone)]
pub struct ConsolePicker {
    requests: mpsc::UnboundedSender<PickRequest>,
}

struct PickRequest {
    candidates: Vec<String>,
    reply: oneshot::Sender<Result<String, PickError>>,
}

#[async_trait]
impl SessionPicker for ConsolePicker {
    async fn pick(&self, candidates: &[String]) -> Result<String, PickError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(PickRequest {
                candidates: candidates.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| PickError::Unavailable("console task stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| PickError::Unavailable("console task stopped".to_string()))?
    }
}

/// Start the console task on stdin
///
/// Returns the picker to wire into the selector and the stream of
/// operator commands for the control loop. When stdin reaches end of
/// input a quit command is issued, as if the operator had typed it.
pub fn start() -> (ConsolePicker, mpsc::UnboundedReceiver<Command>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (req_tx, req_rx) = mpsc::unbounded_channel();

    let lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::spawn(console_task(lines, req_rx, cmd_tx));

    (ConsolePicker { requests: req_tx }, cmd_rx)
}

async fn console_task<R>(
    mut lines: Lines<R>,
    mut requests: mpsc::UnboundedReceiver<PickRequest>,
    commands: mpsc::UnboundedSender<Command>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut stdin_open = true;

    loop {
        tokio::select! {
            request = requests.recv() => {
                // All picker handles dropped; nothing left to serve
                let Some(request) = request else { return };

                let outcome = if stdin_open {
                    prompt_for_choice(&mut lines, &request.candidates).await
                } else {
                    Err(PickError::Unavailable("console input closed".to_string()))
                };
                if stdin_open && matches!(outcome, Err(PickError::Unavailable(_))) {
                    // Input ended mid-prompt; that quits too
                    stdin_open = false;
                    let _ = commands.send(Command::Quit);
                }
                let _ = request.reply.send(outcome);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(command) = parse_command(&line) {
                            if commands.send(command).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        // End of input quits, same as the explicit command
                        debug!("Console input closed");
                        stdin_open = false;
                        let _ = commands.send(Command::Quit);
                    }
                }
            }
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => None,
        "select" | "s" => Some(Command::Select),
        "list" | "ls" | "l" => Some(Command::List),
        "quit" | "q" | "exit" => Some(Command::Quit),
        other => {
            println!("Unknown command '{}'. Commands: select, list, quit", other);
            None
        }
    }
}

/// Show the candidates and read lines until one is chosen or the
/// operator cancels with an empty line
async fn prompt_for_choice<R>(
    lines: &mut Lines<R>,
    candidates: &[String],
) -> Result<String, PickError>
where
    R: AsyncBufRead + Unpin,
{
    println!("Select a session:");
    for (index, id) in candidates.iter().enumerate() {
        println!("  {}) {}", index + 1, display_id(id));
    }
    println!("Enter a number, or press Enter to cancel:");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(PickError::Unavailable("console input closed".to_string())),
            Err(e) => return Err(PickError::Unavailable(e.to_string())),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(PickError::Cancelled);
        }

        if let Ok(number) = trimmed.parse::<usize>() {
            if (1..=candidates.len()).contains(&number) {
                return Ok(candidates[number - 1].clone());
            }
        }

        // Typing the identifier itself also works
        if let Some(id) = candidates.iter().find(|id| display_id(id) == trimmed) {
            return Ok(id.to_string());
        }

        println!(
            "Invalid choice '{}'. Enter 1-{} or press Enter to cancel:",
            trimmed,
            candidates.len()
        );
    }
}
