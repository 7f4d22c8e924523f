//! Terminal progress rendering behind the core `ProgressSink` trait.
//!
//! Scanning renders as a spinner with a live package count; the link
//! phase reuses the line for percentage and bytes saved. Duplicate-group
//! listings and generated link commands go to stdout so they survive
//! redirection, while the spinner stays on stderr.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use console::style;
use indicatif::{HumanBytes, HumanCount, ProgressBar, ProgressStyle};

use linkpack_core::{ProgressSink, RunMode};

pub struct TermSink {
    bar: Mutex<Option<ProgressBar>>,
    mode: RunMode,
}

impl TermSink {
    pub fn new(mode: RunMode) -> Self {
        Self {
            bar: Mutex::new(None),
            mode,
        }
    }

    fn spinner(&self) -> ProgressBar {
        let mut guard = self.bar.lock().unwrap();
        guard
            .get_or_insert_with(|| {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {msg}")
                        .expect("valid progress template"),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(80));
                pb
            })
            .clone()
    }

    pub fn finish(&self) {
        if let Some(pb) = self.bar.lock().unwrap().take() {
            pb.finish_and_clear();
        }
    }

    fn saved_label(&self) -> &'static str {
        match self.mode {
            RunMode::Link => "saved:",
            RunMode::DryRun | RunMode::GenCommands => "would save:",
        }
    }
}

impl ProgressSink for TermSink {
    fn on_scan_progress(&self, packages_seen: u64, current_dir: &Path) {
        self.spinner().set_message(format!(
            "{} {} {} {}",
            style("pkgs:").blue(),
            HumanCount(packages_seen),
            style("scanning:").bold(),
            style(truncate_middle(&current_dir.display().to_string(), 48)).dim(),
        ));
    }

    fn on_link_start(&self) {
        self.spinner().set_message("checking for new links...");
    }

    fn on_duplicate_group(&self, name_version: &str, dirs: &[PathBuf]) {
        let pb = self.spinner();
        pb.println(format!("{}", style(name_version).bold()));
        for dir in dirs {
            pb.println(format!("  {}", dir.display()));
        }
        pb.println("");
    }

    fn on_link_command(&self, src: &Path, dst: &Path) {
        // one shell-ready line per eligible file
        println!("ln -f \"{}\" \"{}\"", src.display(), dst.display());
    }

    fn on_link_progress(&self, completed: u64, total: u64, saved_bytes: u64, _current_dir: &Path) {
        self.spinner().set_message(format!(
            "{} {}% {} {}",
            style("linking:").bold(),
            percent(completed, total),
            style(self.saved_label()).green(),
            style(HumanBytes(saved_bytes).to_string()).bold(),
        ));
    }
}

fn percent(top: u64, bottom: u64) -> u64 {
    if bottom == 0 {
        return 0;
    }
    (top * 100 / bottom).min(100)
}

fn truncate_middle(s: &str, max: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max || max < 5 {
        return s.to_string();
    }
    let keep = (max - 3) / 2;
    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{head}...{tail}")
}
