// ── Progress reporting ────────────────────────────────────────────────────────

use esh_core::{ProgressEvent, ProgressSender, TransferKind};

/// `round(transferred / total * 100)`, clamped to 100. An empty file is
/// complete by definition.
pub fn percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (transferred as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Tracks one transfer and pushes an event per chunk to its own sink.
pub(crate) struct ProgressReporter {
    kind: TransferKind,
    filename: String,
    total: u64,
    transferred: u64,
    sink: Option<ProgressSender>,
}

impl ProgressReporter {
    pub(crate) fn new(
        kind: TransferKind,
        filename: String,
        total: u64,
        sink: Option<ProgressSender>,
    ) -> Self {
        Self {
            kind,
            filename,
            total,
            transferred: 0,
            sink,
        }
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.transferred += bytes as u64;
        self.emit();
    }

    /// Zero-byte transfers still report one final event.
    pub(crate) fn finish(&mut self) {
        if self.transferred == 0 {
            self.emit();
        }
    }

    pub(crate) fn transferred(&self) -> u64 {
        self.transferred
    }

    fn emit(&self) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(ProgressEvent {
                kind: self.kind,
                filename: self.filename.clone(),
                percent: percent(self.transferred, self.total),
                transferred: self.transferred,
                total: self.total,
            });
        }
    }
}
