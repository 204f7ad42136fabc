//! Terminal presentation of update progress.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use otaflow::presentation::{Notice, Presenter};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Renders progress with an indicatif bar and forwards reboot requests to
/// the command, which prompts once the bar is gone.
pub struct ConsolePresenter {
    bar: Mutex<Option<ProgressBar>>,
    reboots: mpsc::UnboundedSender<String>,
}

impl ConsolePresenter {
    pub fn new(reboots: mpsc::UnboundedSender<String>) -> Self {
        Self {
            bar: Mutex::new(None),
            reboots,
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let mut bar = self.bar.lock();
        f(bar.get_or_insert_with(new_bar));
    }

    /// Print a line without tearing the progress bar.
    fn println(&self, line: String) {
        match self.bar.lock().as_ref() {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

impl Presenter for ConsolePresenter {
    fn clear(&self) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
    }

    fn show_progress(&self, message: &str, percent: u8) {
        let message = message.to_string();
        self.with_bar(|bar| {
            bar.set_position(u64::from(percent));
            bar.set_message(message);
        });
    }

    fn show_message(&self, message: &str) {
        let message = message.to_string();
        self.with_bar(|bar| bar.set_message(message));
    }

    fn notice(&self, notice: Notice) {
        let line = match &notice {
            Notice::UpdateStarting => format!("{}", style(&notice).green()),
            _ => format!("{}", style(&notice).red().bold()),
        };
        self.println(line);
    }

    fn request_reboot(&self, reason: &str) {
        let _ = self.reboots.send(reason.to_string());
    }
}
