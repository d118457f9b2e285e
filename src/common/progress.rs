use indicatif::{ProgressBar, ProgressStyle};

use crate::sync::tracker::{SyncJobState, SyncPhase, SyncStatus};

pub fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠁⠉⠙⠚⠒⠂⠂⠒⠲⠴⠤⠄⠄⠤⠠⠠⠤⠦⠖⠒⠐⠐⠒⠓⠋⠉⠙⠚⠒⠂⠂⠒⠲⠴⠤⠄⠄⠤⠠⠠⠤⠦⠖⠒⠐⠐⠒⠓⠋⠉⠙⠚"),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Finish a spinner and print a success message with a checkmark
/// This clears the spinner line entirely and prints a clean message
pub fn finish_spinner_with_success(pb: ProgressBar, message: impl Into<String>) {
    pb.finish_and_clear();
    println!("✓ {}", message.into());
}

/// Bar for one sync run, driven by tracker snapshots via [`update_sync_bar`]
pub fn create_sync_bar(label: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold} {wide_bar:.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_prefix(label.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

pub fn update_sync_bar(pb: &ProgressBar, state: &SyncJobState) {
    let (position, length) = match state.status {
        SyncStatus::Running {
            phase: SyncPhase::Fetch,
        } => (state.fetch_progress, state.fetch_total),
        _ => (state.store_progress, state.store_total),
    };
    pb.set_length(length);
    pb.set_position(position);

    let message = match &state.status {
        SyncStatus::Running {
            phase: SyncPhase::Fetch,
        } if !state.current_item.is_empty() => format!("fetching {}", state.current_item),
        status => status.label().to_string(),
    };
    pb.set_message(message);
}
