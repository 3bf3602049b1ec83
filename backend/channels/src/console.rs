/// Line-oriented console adapter.
///
/// Each input line becomes one `InboundMessage` from a fixed user and
/// channel. Replies are written back as `[channel] text` lines.
use crate::ChannelAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use opbot_core::{InboundMessage, Transport};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

pub struct ConsoleAdapter {
    user: String,
    channel: String,
    input: Mutex<Option<Input>>,
    output: Mutex<Output>,
}

impl ConsoleAdapter {
    pub fn new(
        user: impl Into<String>,
        channel: impl Into<String>,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            user: user.into(),
            channel: channel.into(),
            input: Mutex::new(Some(Box::new(input))),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Adapter bound to the process's stdin and stdout.
    pub fn stdio(user: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(
            user,
            channel,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }
}

#[async_trait]
impl ChannelAdapter for ConsoleAdapter {
    fn name(&self) -> &str {
        "console"
    }

    /// Reads until end of input or until the inbound queue closes. The input
    /// can only be consumed once.
    async fn start(&self, inbound_tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        let input = self
            .input
            .lock()
            .await
            .take()
            .context("console input already consumed")?;
        info!(user = %self.user, channel = %self.channel, "[Console] Reading input");

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let msg = InboundMessage::new(text, self.user.as_str(), self.channel.as_str());
            if inbound_tx.send(msg).await.is_err() {
                debug!("[Console] Inbound queue closed");
                break;
            }
        }
        info!("[Console] Input finished");
        Ok(())
    }
}

#[async_trait]
impl Transport for ConsoleAdapter {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_message(&self, text: &str, channel: &str) -> Result<()> {
        let mut out = self.output.lock().await;
        out.write_all(format!("[{channel}] {text}\n").as_bytes())
            .await?;
        out.flush().await?;
        Ok(())
    }
}
