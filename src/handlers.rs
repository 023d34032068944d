use anyhow::Result;
use teloxide::prelude::*;
use tracing::{info, instrument, warn};

use crate::discovery::{CycleReport, DiscoveryEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Publish the newest article right now.
    LatestArticle,
    /// Run a discovery cycle outside the schedule.
    Check,
    /// Show the stored cursor.
    Status,
}

/// Recognize `/command` or `/command@BotName` at the start of a message.
pub fn parse_command(text: &str) -> Option<BotCommand> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split_once('@').map(|(n, _)| n).unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "latest_article" | "latest" => Some(BotCommand::LatestArticle),
        "check" => Some(BotCommand::Check),
        "status" => Some(BotCommand::Status),
        _ => None,
    }
}

pub fn describe_report(report: &CycleReport) -> String {
    if report.discovered == 0 {
        return format!("No new articles ({} fetched).", report.fetched);
    }
    let mut text = format!(
        "Published {} of {} new articles.",
        report.published.len(),
        report.discovered
    );
    if report.interrupted {
        text.push_str(" Stopped early for shutdown.");
    }
    text
}

#[instrument(skip_all)]
pub async fn handle_update(
    bot: &Bot,
    engine: &DiscoveryEngine,
    allowed_users: &[i64],
    msg: &Message,
) -> Result<()> {
    let Some(command) = msg.text().and_then(parse_command) else {
        return Ok(());
    };
    let user = match msg.from() {
        Some(u) => u,
        None => return Ok(()),
    };
    let tg_user_id = user.id.0 as i64;
    if !allowed_users.contains(&tg_user_id) {
        warn!(tg_user_id, ?command, "ignoring command from user not in allowed_users");
        return Ok(());
    }
    info!(tg_user_id, ?command, "handling command");

    let reply = match command {
        BotCommand::LatestArticle => match engine.publish_latest().await {
            Ok(Some(article)) => format!("Published latest article: {}", article.title),
            Ok(None) => "No articles found right now.".to_string(),
            Err(err) => {
                warn!(error = %err, "latest_article failed");
                format!("Could not publish the latest article: {}", err)
            }
        },
        BotCommand::Check => match engine.run_cycle().await {
            Ok(report) => describe_report(&report),
            Err(err) => {
                warn!(error = %err, "on-demand check failed");
                format!("Check failed: {}", err)
            }
        },
        BotCommand::Status => match engine.load_cursor().await {
            Ok(cursor) => format!("Last published: {}", cursor),
            Err(err) => format!("Could not read cursor: {}", err),
        },
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryMode;

    #[test]
    fn parses_plain_and_addressed_commands() {
        assert_eq!(
            parse_command("/latest_article"),
            Some(BotCommand::LatestArticle)
        );
        assert_eq!(
            parse_command("/latest_article@HelpWatchBot please"),
            Some(BotCommand::LatestArticle)
        );
        assert_eq!(parse_command("  /CHECK "), Some(BotCommand::Check));
        assert_eq!(parse_command("/status"), Some(BotCommand::Status));
    }

    #[test]
    fn ignores_non_commands() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/unknown"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("check /status"), None);
    }

    #[test]
    fn report_description() {
        let mut report = CycleReport {
            mode: DiscoveryMode::Cursor,
            fetched: 12,
            discovered: 0,
            published: vec![],
            interrupted: false,
        };
        assert_eq!(describe_report(&report), "No new articles (12 fetched).");

        report.discovered = 3;
        report.published = vec![1, 2];
        report.interrupted = true;
        assert_eq!(
            describe_report(&report),
            "Published 2 of 3 new articles. Stopped early for shutdown."
        );
    }
}
