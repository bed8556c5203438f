//! Pipeline-stage classification of worker log lines.
//!
//! The worker emits one human-readable line per pipeline event; each line
//! is matched against an ordered marker table. First match wins and
//! matching is case-insensitive.

/// A recognized pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Recon,
    Copy,
    Variator,
    Builder,
    Assets,
    Motion,
    Audit,
    Done,
    Busy,
    Warn,
}

impl Stage {
    pub fn key(self) -> &'static str {
        match self {
            Self::Recon => "recon",
            Self::Copy => "copy",
            Self::Variator => "variator",
            Self::Builder => "builder",
            Self::Assets => "assets",
            Self::Motion => "motion",
            Self::Audit => "audit",
            Self::Done => "done",
            Self::Busy => "busy",
            Self::Warn => "warn",
        }
    }

    /// Notification text sent to the chat when this stage first appears.
    pub fn message(self) -> &'static str {
        match self {
            Self::Recon => "Market/domain analysis in progress.",
            Self::Copy => "Copy strategy generation in progress.",
            Self::Variator => "Design variation selection in progress.",
            Self::Builder => "Building the web package.",
            Self::Assets => "Generating image assets.",
            Self::Motion => "Applying motion/animation effects.",
            Self::Audit => "Running quality audit.",
            Self::Done => "Generation pipeline completed.",
            Self::Busy => "The worker is currently busy with another task.",
            Self::Warn => "Issue detected. Attempting recovery/check.",
        }
    }
}

/// Ordered marker table: any of the listed substrings maps a line to the
/// stage. Order matters — earlier rows shadow later ones.
const MARKERS: &[(&[&str], Stage)] = &[
    (&["[recon]"], Stage::Recon),
    (&["[copy]"], Stage::Copy),
    (&["[variator]"], Stage::Variator),
    (&["[builder]"], Stage::Builder),
    (&["[generate]", "image_gen subprocess"], Stage::Assets),
    (&["[motion]"], Stage::Motion),
    (&["[audit]"], Stage::Audit),
    (&["[done]", "pipeline complete"], Stage::Done),
    (&["[skip] codex busy"], Stage::Busy),
    (&["[error]", " failed"], Stage::Warn),
];

/// Classify one log line, or `None` when no marker matches.
pub fn classify(line: &str) -> Option<Stage> {
    let lower = line.to_lowercase();
    MARKERS
        .iter()
        .find(|(markers, _)| markers.iter().any(|m| lower.contains(m)))
        .map(|(_, stage)| *stage)
}

/// Whether a line looks like an error/failure diagnostic. Used when
/// scanning the log tail after a nonzero exit.
pub fn is_failure_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error") || lower.contains("failed")
}
