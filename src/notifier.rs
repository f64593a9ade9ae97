//! Out-of-scope external collaborator (§1): the Telegram notifier's wire
//! protocol isn't specified, only that fatal errors optionally emit to it
//! when enabled (§7). Default is a log-based no-op so the rest of the bot
//! never depends on Telegram being configured.
use log::{error, info};

pub trait Notifier: Send + Sync {
    fn notify_fatal(&self, message: &str);
    fn notify_info(&self, message: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_fatal(&self, message: &str) {
        error!("[notify] {message}");
    }

    fn notify_info(&self, message: &str) {
        info!("[notify] {message}");
    }
}
