//! The shared export-processing sequence.
//!
//! Both the one-shot `sync` command and the watcher's per-job task run the
//! same steps: read the digest, aggregate daily totals, then upload the
//! three data categories in order.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::export::{aggregate, ExportReader};
use crate::upload::{PayloadShape, Uploader};

/// What a processed export delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub days: usize,
    pub activity_summaries: usize,
}

pub struct Pipeline {
    reader: Arc<dyn ExportReader>,
    uploader: Uploader,
}

impl Pipeline {
    pub fn new(reader: Arc<dyn ExportReader>, uploader: Uploader) -> Self {
        Self { reader, uploader }
    }

    /// Read, aggregate, and upload one export.
    ///
    /// Upload order: user info, then daily summaries, then activity
    /// summaries. Any failure propagates to the caller; chunks the backend
    /// already accepted stay delivered and a re-run upserts them by date.
    pub async fn process_export(&self, path: &Path, token: &str) -> Result<UploadReport, AppError> {
        let data = self.reader.read(path)?;
        let export_date = data.export_date();

        let daily = aggregate::aggregate_daily(&data.records);
        let summaries = aggregate::build_summaries(&daily, &export_date);
        info!(
            export = %path.display(),
            %export_date,
            days = summaries.len(),
            activity_summaries = data.activity_summaries.len(),
            "Processing export"
        );

        let user_info = json!({
            "exportDate": export_date,
            "attributes": data.user_attributes(),
        });
        self.uploader
            .post_object(PayloadShape::UserInfo, &user_info, token)
            .await?;

        self.uploader
            .post_chunked(PayloadShape::DailySummaries, &summaries, token, None)
            .await?;

        self.uploader
            .post_chunked(
                PayloadShape::ActivitySummaries,
                &data.activity_summaries,
                token,
                Some(&export_date),
            )
            .await?;

        Ok(UploadReport {
            days: summaries.len(),
            activity_summaries: data.activity_summaries.len(),
        })
    }
}
