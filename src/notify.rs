use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Side effect fired once the first frame of a session is accepted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self) -> Result<()>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens the chart page in the desktop's default browser.
pub struct BrowserOpener {
    url: String,
}

impl BrowserOpener {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn command(&self) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(&self.url);
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", self.url.as_str()]);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(&self.url);
            cmd
        }
    }
}

#[async_trait]
impl Notifier for BrowserOpener {
    async fn notify(&self) -> Result<()> {
        let status = self.command().status().await?;
        if !status.success() {
            return Err(anyhow!("browser opener exited with {}", status));
        }
        Ok(())
    }
}
