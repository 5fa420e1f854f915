use std::collections::HashSet;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::archive::{self, Post};
use crate::config::Config;
use crate::dingtalk::{is_accepted, DingTalkClient};
use crate::format::format_message;
use crate::translate::Translator;

/// How a single pass over the archive ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The archive is missing, malformed or empty.
    EmptyArchive,
    /// No access token could be obtained; nothing was sent.
    TokenUnavailable,
    /// Every post in the window is already in the ledger.
    NothingNew,
    Delivered(DeliveryReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Ids confirmed by DingTalk, in send order.
    pub sent: Vec<String>,
    /// Ids that a dry run rendered but did not send.
    pub previewed: Vec<String>,
    /// Ids passed over because of blank content or an unreadable timestamp.
    pub skipped: Vec<String>,
    /// A send failed and the remaining candidates were left for the next pass.
    pub aborted: bool,
    pub dry_run: bool,
}

impl RunOutcome {
    /// False when the pass stopped early because of an external failure.
    pub fn is_complete(&self) -> bool {
        match self {
            RunOutcome::TokenUnavailable => false,
            RunOutcome::Delivered(report) => !report.aborted,
            RunOutcome::EmptyArchive | RunOutcome::NothingNew => true,
        }
    }
}

/// Posts among the last `window` archive entries whose id is not in the
/// ledger, oldest first. Posts with equal (or unparseable) timestamps keep
/// their archive order; unparseable ones come first.
pub fn select_candidates(archive: &[Post], ledger: &[String], window: usize) -> Vec<Post> {
    let sent: HashSet<&str> = ledger.iter().map(String::as_str).collect();
    let start = archive.len().saturating_sub(window);

    let mut candidates: Vec<Post> = archive[start..]
        .iter()
        .filter(|post| !sent.contains(post.id.as_str()))
        .cloned()
        .collect();

    candidates.sort_by_key(Post::timestamp);
    candidates
}

/// Forwards new archive posts to the DingTalk group and records them in the
/// sent ledger.
pub struct Relay {
    config: Config,
    dingtalk: DingTalkClient,
    translator: Translator,
}

impl Relay {
    pub fn new(config: Config) -> Self {
        let dingtalk = DingTalkClient::new(config.dingtalk.clone());
        let translator = Translator::new(config.translator.clone());
        Self {
            config,
            dingtalk,
            translator,
        }
    }

    /// One pass: send undelivered posts in chronological order, stop at the
    /// first failed send, persist what was confirmed.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        let paths = &self.config.archive;
        let dry_run = self.config.delivery.dry_run;

        let posts = archive::load_archive(&paths.archive_path);
        if posts.is_empty() {
            info!("No posts to process");
            return Ok(RunOutcome::EmptyArchive);
        }

        let mut ledger = archive::load_ledger(&paths.ledger_path)?;

        let token = if dry_run {
            String::new()
        } else {
            match self.dingtalk.get_access_token().await {
                Ok(token) => token,
                Err(e) => {
                    error!("Unable to obtain DingTalk access token: {:#}", e);
                    return Ok(RunOutcome::TokenUnavailable);
                }
            }
        };

        let candidates = select_candidates(&posts, &ledger, paths.window);
        if candidates.is_empty() {
            info!("No new posts to push");
            return Ok(RunOutcome::NothingNew);
        }
        info!("Found {} new posts", candidates.len());

        let mut report = DeliveryReport {
            dry_run,
            ..Default::default()
        };

        for post in &candidates {
            if post.is_blank() {
                info!("Skipping post {} with empty content", post.id);
                report.skipped.push(post.id.clone());
                continue;
            }
            let Some(created_at) = post.timestamp() else {
                warn!(
                    "Skipping post {} with unreadable timestamp {:?}",
                    post.id, post.created_at
                );
                report.skipped.push(post.id.clone());
                continue;
            };

            let message = format_message(created_at, &post.content, &self.translator).await;

            if dry_run {
                info!("[dry-run] would send post {}:\n{}", post.id, message);
                report.previewed.push(post.id.clone());
                continue;
            }

            match self.dingtalk.send_message(&token, &message).await {
                Ok(response) if is_accepted(&response) => {
                    info!("Sent post {}", post.id);
                    report.sent.push(post.id.clone());
                }
                Ok(response) => {
                    error!("DingTalk did not accept post {}: {}", post.id, response);
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    error!("Failed to send post {}: {}", post.id, e);
                    report.aborted = true;
                    break;
                }
            }
        }

        if !report.sent.is_empty() {
            ledger.extend(report.sent.iter().cloned());
            archive::save_ledger(&paths.ledger_path, &ledger)?;
            info!("Recorded {} sent posts", report.sent.len());
        }

        if report.aborted {
            warn!(
                "Stopped after {} of {} posts; the rest will be retried next run",
                report.sent.len(),
                candidates.len()
            );
        }

        Ok(RunOutcome::Delivered(report))
    }
}
