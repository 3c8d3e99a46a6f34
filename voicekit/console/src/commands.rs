//! Subcommand implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use voicekit_core::api::{
    AccountService, ApiError, HistoryDataSource, NoRefresh, TokenRefresher, Vocalizer,
};
use voicekit_core::{
    BubbleAction, ConversationController, HistoryFilter, HttpBackend, IndexPath, Origin, Preferences,
    Services, SortOrder, SurfaceUpdate, TokenRetry, TokenStore, VoiceKitConfig, VoiceKitContext, Vote,
};

use crate::refresh::{read_token, FileTokenRefresher};
use crate::render;

/// Speaking is out of reach for a terminal; print instead
struct PrintVocalizer;

#[async_trait]
impl Vocalizer for PrintVocalizer {
    async fn vocalize(&self, text: &str) -> Result<(), ApiError> {
        println!("(speaking) {text}");
        Ok(())
    }
}

/// Wires the controller to the REST backend
pub struct Host {
    context: VoiceKitContext,
    backend: Arc<HttpBackend>,
    retry: TokenRetry,
}

impl Host {
    /// Build the backend from config and the token sources
    ///
    /// A token given directly wins over the token file; the file is still
    /// used for refreshes.
    pub async fn connect(
        config: VoiceKitConfig,
        token: Option<String>,
        token_file: Option<PathBuf>,
    ) -> Result<Self> {
        let tokens = TokenStore::new();
        match (token, &token_file) {
            (Some(token), _) => tokens.set(token),
            (None, Some(path)) => {
                if let Some(token) = read_token(path).await? {
                    tokens.set(token);
                }
            }
            (None, None) => {}
        }
        if tokens.get().is_none() {
            bail!("No access token; pass --token or --token-file");
        }

        let refresher: Arc<dyn TokenRefresher> = match token_file {
            Some(path) => Arc::new(FileTokenRefresher::new(path, tokens.clone())),
            None => Arc::new(NoRefresh),
        };
        let backend = HttpBackend::new(&config.api, tokens).context("Failed to build HTTP client")?;
        info!(?backend, "Backend ready");

        Ok(Self {
            context: VoiceKitContext::new(config),
            backend: Arc::new(backend),
            retry: TokenRetry::new(refresher),
        })
    }

    fn controller(&self) -> (ConversationController, mpsc::Receiver<SurfaceUpdate>) {
        let (tx, rx) = mpsc::channel(256);
        let services = Services {
            conversation: self.backend.clone(),
            history: self.backend.clone(),
            vocalizer: Arc::new(PrintVocalizer),
        };
        let controller =
            ConversationController::new(&self.context.config, services, self.retry.clone(), tx);
        (controller, rx)
    }

    /// Interactive session
    ///
    /// Lines are sent as utterances. `:older` loads another history page,
    /// `:show` reprints the conversation, `:quit` leaves.
    pub async fn chat(&self) -> Result<()> {
        let (mut controller, mut rx) = self.controller();

        let prefs_path = &self.context.preferences_path;
        let mut prefs = Preferences::load(prefs_path).await?;
        if controller.show_welcome_if_needed(&mut prefs).await {
            prefs.save(prefs_path).await?;
        }
        let _ = controller.load_older_history().await;
        print!("{}", render::conversation_text(controller.conversation()));
        print_updates(&mut rx);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            match line {
                "" => continue,
                ":quit" | ":q" => break,
                ":older" => {
                    let _ = controller.load_older_history().await;
                    print!("{}", render::conversation_text(controller.conversation()));
                }
                ":show" => print!("{}", render::conversation_text(controller.conversation())),
                text => {
                    if controller.send_text(text).await.is_ok() {
                        print_last_exchange(&controller);
                    }
                }
            }
            print_updates(&mut rx);
        }
        debug!("Chat session ended");
        Ok(())
    }

    /// Print `pages` history pages, optionally for one device
    pub async fn history(&self, pages: usize, device: Option<String>) -> Result<()> {
        let (mut controller, mut rx) = self.controller();
        if device.is_some() {
            controller
                .apply_filter(HistoryFilter {
                    device_serial: device,
                    ..HistoryFilter::default()
                })
                .await?;
        } else {
            controller.load_older_history().await?;
        }
        for _ in 1..pages {
            if controller.paginator().reached_oldest() {
                break;
            }
            controller.load_older_history().await?;
        }

        print!("{}", render::conversation_text(controller.conversation()));
        print_updates(&mut rx);
        Ok(())
    }

    /// Send one utterance
    pub async fn send(&self, text: &str) -> Result<()> {
        let (mut controller, mut rx) = self.controller();
        let result = controller.send_text(text).await;
        print_last_exchange(&controller);
        print_updates(&mut rx);
        result.context("Request failed")
    }

    /// Delete a history entry by id
    pub async fn delete(&self, history_id: &str) -> Result<()> {
        let (mut controller, mut rx) = self.controller();
        let paths = find_history(&mut controller, history_id).await?;
        let removed = controller.delete_at(paths[0]).await?;
        print_updates(&mut rx);
        println!("Deleted {history_id} ({removed} entries)");
        Ok(())
    }

    /// Vote on the answer of a history entry
    pub async fn feedback(&self, history_id: &str, vote: Vote) -> Result<()> {
        let (mut controller, mut rx) = self.controller();
        let paths = find_history(&mut controller, history_id).await?;
        let answer = paths.iter().copied().find(|path| {
            controller
                .conversation()
                .get(*path)
                .is_some_and(|bubble| bubble.origin == Origin::Assistant)
        });
        let Some(path) = answer else {
            bail!("History entry {history_id} has no answer to rate");
        };
        controller
            .perform(BubbleAction::Feedback(vote), path)
            .await?;
        if let Some(bubble) = controller.conversation().get(path) {
            println!("{}", render::bubble_line(bubble));
        }
        print_updates(&mut rx);
        Ok(())
    }

    /// List devices
    pub async fn devices(&self) -> Result<()> {
        let devices = self
            .retry
            .run("history.devices", || self.backend.devices())
            .await?;
        if devices.is_empty() {
            println!("No devices");
        }
        for device in devices {
            match device.model {
                Some(model) => println!("{}  {} ({model})", device.serial_number, device.name),
                None => println!("{}  {}", device.serial_number, device.name),
            }
        }
        Ok(())
    }

    /// Show agreements, accepting the pending ones on request
    pub async fn agreements(&self, accept: bool) -> Result<()> {
        let agreements = self
            .retry
            .run("account.agreements", || self.backend.user_agreements())
            .await?;
        for agreement in &agreements {
            println!("{}", render::agreement_line(agreement));
        }

        let pending: Vec<String> = agreements
            .iter()
            .filter(|agreement| !agreement.accepted)
            .map(|agreement| agreement.id.clone())
            .collect();
        if accept && !pending.is_empty() {
            self.retry
                .run("account.accept", || self.backend.accept_agreements(&pending))
                .await?;
            println!("Accepted {} agreement(s)", pending.len());
        }
        Ok(())
    }
}

/// Load history pages until an entry with `history_id` shows up
///
/// Returns every row of the exchange, expanding the error group that
/// hides it if needed.
async fn find_history(
    controller: &mut ConversationController,
    history_id: &str,
) -> Result<Vec<IndexPath>> {
    loop {
        let paths = controller.reveal_history(history_id).await;
        if !paths.is_empty() {
            return Ok(paths);
        }
        if controller.paginator().reached_oldest() {
            bail!("History entry {history_id} not found");
        }
        controller.load_older_history().await?;
    }
}

fn print_last_exchange(controller: &ConversationController) {
    let conversation = controller.conversation();
    let mut rows: Vec<_> = conversation.iter().map(|(_, bubble)| bubble).collect();
    // Newest rows come first in descending layout.
    if conversation.order() == SortOrder::Descending {
        rows.reverse();
    }
    let start = rows.len().saturating_sub(2);
    for bubble in &rows[start..] {
        println!("{}", render::bubble_line(bubble));
    }
}

fn print_updates(rx: &mut mpsc::Receiver<SurfaceUpdate>) {
    while let Ok(update) = rx.try_recv() {
        if let Some(line) = render::describe(&update) {
            println!("{line}");
        }
    }
}
