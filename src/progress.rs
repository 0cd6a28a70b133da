//! Progress reporting and display
//!
//! The report job only talks to the [`ProgressReporter`] trait, so the pipeline
//! stays decoupled from how (or whether) progress is drawn.

use std::sync::{Arc, RwLock};

use crate::job::ArchiveStatus;

/// Phase of the overall run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchPhase {
    /// Looking up the inventory report id
    ResolvingReport,
    /// Paging through the inventory report
    Enumerating,
    /// Listing healthy cluster nodes
    ResolvingTopology,
    /// Fetching archive status per object
    LookingUp,
    /// Writing the output file
    WritingReport,
    /// Completed successfully
    Completed,
    /// Failed with error
    Failed(String),
}

/// Progress reporter trait - implement this for different display backends.
pub trait ProgressReporter: Send + Sync {
    /// Set the overall batch phase.
    fn set_phase(&self, phase: BatchPhase);

    /// Update enumeration counters. Called once per report row.
    fn set_enumeration_progress(&self, found: usize, total: usize);

    /// Announce the number of lookups about to run.
    fn register_lookups(&self, total: usize);

    /// One lookup finished. `completed` counts finished lookups, in any order.
    fn lookup_finished(&self, object: &str, status: &ArchiveStatus, completed: usize, total: usize);

    /// Surface a non-fatal problem to the user.
    fn log_warn(&self, message: &str);

    /// Finish and clean up the display.
    fn finish(&self);
}

/// A no-op reporter for when progress display is disabled.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: BatchPhase) {}
    fn set_enumeration_progress(&self, _found: usize, _total: usize) {}
    fn register_lookups(&self, _total: usize) {}
    fn lookup_finished(
        &self,
        _object: &str,
        _status: &ArchiveStatus,
        _completed: usize,
        _total: usize,
    ) {
    }
    fn log_warn(&self, _message: &str) {}
    fn finish(&self) {}
}

/// Statistics collected during a run.
#[derive(Debug)]
struct Stats {
    found: usize,
    scanned: usize,
    archived: usize,
    not_archived: usize,
    failed: usize,
    start_time: std::time::Instant,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            found: 0,
            scanned: 0,
            archived: 0,
            not_archived: 0,
            failed: 0,
            start_time: std::time::Instant::now(),
        }
    }
}

impl Stats {
    fn record(&mut self, status: &ArchiveStatus) {
        match status {
            ArchiveStatus::Archived(_) => self.archived += 1,
            ArchiveStatus::NotArchived => self.not_archived += 1,
            ArchiveStatus::LookupFailed(_) => self.failed += 1,
        }
    }

    fn print_summary(&self) {
        eprintln!();
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("📊 Summary");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("   📄 Objects:      {} of {} scanned", self.found, self.scanned);
        eprintln!("   ☁️  Archived:     {}", self.archived);
        eprintln!("   ⛔ Not archived: {}", self.not_archived);
        if self.failed > 0 {
            eprintln!("   ❌ Failed:       {}", self.failed);
        }
        eprintln!(
            "   ⏱️  Duration:     {:.2}s",
            self.start_time.elapsed().as_secs_f64()
        );
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

fn phase_message(phase: &BatchPhase) -> Option<(&'static str, &'static str)> {
    match phase {
        BatchPhase::ResolvingReport => Some(("🔎", "Resolving report id...")),
        BatchPhase::Enumerating => Some(("📋", "Identifying objects...")),
        BatchPhase::ResolvingTopology => Some(("🖧 ", "Resolving cluster nodes...")),
        BatchPhase::LookingUp => Some(("☁️ ", "Getting object archive information...")),
        BatchPhase::WritingReport => Some(("📝", "Writing report...")),
        BatchPhase::Completed => Some(("✅", "Completed!")),
        BatchPhase::Failed(_) => None,
    }
}

/// A simple reporter that just prints to stderr (for non-TTY).
pub struct SimpleReporter {
    stats: RwLock<Stats>,
}

impl SimpleReporter {
    const ENUMERATION_STEP: usize = 1000;

    pub fn new() -> Self {
        Self {
            stats: RwLock::new(Stats::default()),
        }
    }
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SimpleReporter {
    fn set_phase(&self, phase: BatchPhase) {
        if let BatchPhase::ResolvingTopology = phase {
            let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
            eprintln!("   Identified {}/{} objects", stats.found, stats.scanned);
        }
        match phase_message(&phase) {
            Some((emoji, msg)) => eprintln!("{emoji} {msg}"),
            None => {
                if let BatchPhase::Failed(e) = phase {
                    eprintln!("❌ Failed: {e}");
                }
            }
        }
    }

    fn set_enumeration_progress(&self, found: usize, total: usize) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        stats.found = found;
        stats.scanned = total;
        if total % Self::ENUMERATION_STEP == 0 {
            eprintln!("   Identifying objects {found}/{total}");
        }
    }

    fn register_lookups(&self, total: usize) {
        eprintln!("   Looking up {total} objects");
    }

    fn lookup_finished(&self, object: &str, status: &ArchiveStatus, completed: usize, total: usize) {
        self.stats
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .record(status);
        if let ArchiveStatus::LookupFailed(reason) = status {
            eprintln!("   ✗ {object}: {reason}");
        }
        // print on every 10% boundary
        let step = total.div_ceil(10).max(1);
        if completed % step == 0 || completed == total {
            eprintln!("   {completed} of {total}");
        }
    }

    fn log_warn(&self, message: &str) {
        eprintln!("⚠️  {message}");
    }

    fn finish(&self) {
        self.stats
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .print_summary();
    }
}

/// Fancy interactive reporter with progress bars (for TTY).
pub struct FancyReporter {
    multi: indicatif::MultiProgress,
    phase_bar: indicatif::ProgressBar,
    lookup_bar: RwLock<Option<indicatif::ProgressBar>>,
    stats: RwLock<Stats>,
}

impl FancyReporter {
    pub fn new() -> Self {
        let multi = indicatif::MultiProgress::new();
        let phase_bar = multi.add(indicatif::ProgressBar::new_spinner());
        if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")
        {
            phase_bar.set_style(style);
        }
        phase_bar.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            multi,
            phase_bar,
            lookup_bar: RwLock::new(None),
            stats: RwLock::new(Stats::default()),
        }
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for FancyReporter {
    fn set_phase(&self, phase: BatchPhase) {
        let Some((emoji, msg)) = phase_message(&phase) else {
            if let BatchPhase::Failed(e) = phase {
                self.phase_bar
                    .finish_with_message(format!("❌ Failed: {e}"));
            }
            return;
        };
        if let BatchPhase::ResolvingTopology = phase {
            let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
            self.multi
                .println(format!(
                    "📋 Identified {}/{} objects",
                    stats.found, stats.scanned
                ))
                .ok();
        }
        self.phase_bar.set_message(format!("{emoji} {msg}"));
        if let BatchPhase::Completed = phase {
            self.phase_bar.finish_with_message(format!("{emoji} {msg}"));
        }
    }

    fn set_enumeration_progress(&self, found: usize, total: usize) {
        {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            stats.found = found;
            stats.scanned = total;
        }
        self.phase_bar
            .set_message(format!("📋 Identifying objects {found}/{total}"));
    }

    fn register_lookups(&self, total: usize) {
        let bar = self.multi.add(indicatif::ProgressBar::new(total as u64));
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("   {bar:60.cyan/blue} {percent:>3}% ({pos} of {len}, {elapsed})")
        {
            bar.set_style(style.progress_chars("█▓▒░  "));
        }
        *self.lookup_bar.write().unwrap_or_else(|e| e.into_inner()) = Some(bar);
    }

    fn lookup_finished(&self, object: &str, status: &ArchiveStatus, completed: usize, _total: usize) {
        self.stats
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .record(status);
        if let ArchiveStatus::LookupFailed(reason) = status {
            self.multi.println(format!("   ✗ {object}: {reason}")).ok();
        }
        if let Some(bar) = &*self.lookup_bar.read().unwrap_or_else(|e| e.into_inner()) {
            bar.set_position(completed as u64);
        }
    }

    fn log_warn(&self, message: &str) {
        self.multi.println(format!("⚠️  {message}")).ok();
    }

    fn finish(&self) {
        if let Some(bar) = &*self.lookup_bar.read().unwrap_or_else(|e| e.into_inner()) {
            bar.finish();
        }
        self.phase_bar.finish_and_clear();
        self.stats
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .print_summary();
    }
}

/// Create an appropriate reporter based on terminal capabilities.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    if console::Term::stderr().is_term() {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}
