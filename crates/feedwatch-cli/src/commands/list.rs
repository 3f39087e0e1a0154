use std::path::Path;

use chrono::Utc;
use feedwatch_core::filter::{filter_feedback, FeedbackFilter};

use crate::commands::common::{
    authorized_client, feedback_to_list_item, format_feedback_lines, FeedbackListItem,
    EMPTY_FEED_MESSAGE,
};
use crate::error::CliError;

pub async fn run_list(
    api_url: &str,
    limit: usize,
    filter: &FeedbackFilter,
    as_json: bool,
    session_path: &Path,
) -> Result<(), CliError> {
    let client = authorized_client(api_url, session_path)?;
    let records = client.fetch_snapshot(limit).await?;
    let visible = filter_feedback(&records, filter);
    let now_ms = Utc::now().timestamp_millis();

    if as_json {
        let json_items = visible
            .iter()
            .map(|record| feedback_to_list_item(record, now_ms))
            .collect::<Vec<FeedbackListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if visible.is_empty() {
        println!("{EMPTY_FEED_MESSAGE}");
    } else {
        for line in format_feedback_lines(&visible, now_ms) {
            println!("{line}");
        }
        if !filter.is_empty() {
            println!("{} of {} shown", visible.len(), records.len());
        }
    }

    Ok(())
}
