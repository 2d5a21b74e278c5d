use crate::cli::SessionCommand;
use crate::error::{Result, ToolwireError};
use crate::storage::SessionStore;
use colored::Colorize;
use prettytable::{format, Table};

/// Handle session commands against `store`
pub async fn handle_sessions(command: SessionCommand, store: &dyn SessionStore) -> Result<()> {
    match command {
        SessionCommand::List => {
            let sessions = store.list().await?;

            if sessions.is_empty() {
                println!("{}", "No stored sessions found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

            table.add_row(prettytable::row![
                "ID".bold(),
                "User".bold(),
                "Parent".bold(),
                "Messages".bold(),
                "Last Updated".bold()
            ]);

            for session in sessions {
                let id_short: String = session.id.chars().take(8).collect();
                let user = session.user_id.unwrap_or_else(|| "-".to_string());
                let parent = session
                    .parent_id
                    .map(|p| p.chars().take(8).collect::<String>())
                    .unwrap_or_else(|| "-".to_string());
                let updated = session.updated_at.format("%Y-%m-%d %H:%M").to_string();

                table.add_row(prettytable::row![
                    id_short.cyan(),
                    user,
                    parent,
                    session.message_count,
                    updated
                ]);
            }

            println!("\nStored Sessions:");
            table.printstd();
            println!();
        }
        SessionCommand::Show { id } => {
            let record = store
                .load(&id)
                .await?
                .ok_or_else(|| ToolwireError::SessionNotFound(id.clone()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        SessionCommand::Delete { id } => {
            store.delete(&id).await?;
            println!("{}", format!("Deleted session {}", id).green());
        }
    }

    Ok(())
}
