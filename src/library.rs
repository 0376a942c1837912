//! `/my_files` and `/search`: browse the files a user has stored.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::command::Command;
use crate::composer::escape_html;
use crate::links::{composite_id, LinkBuilder};
use crate::models::FilePage;
use crate::store::Store;

pub const PAGE_SIZE: u64 = 5;

pub struct Library {
    store: Arc<dyn Store>,
    links: LinkBuilder,
}

impl Library {
    pub fn new(store: Arc<dyn Store>, links: LinkBuilder) -> Self {
        Self { store, links }
    }

    /// Reply to a browsing command, or `None` for any other command.
    pub async fn execute(&self, user_id: i64, command: &Command) -> Result<Option<String>> {
        let reply = match command.name.as_str() {
            "my_files" => match command.args().as_slice() {
                [] => self.list(user_id, None, 1).await?,
                [page] => match page.parse::<u64>() {
                    Ok(page) if page > 0 => self.list(user_id, None, page).await?,
                    _ => "Usage: /my_files <code>[page]</code>".to_string(),
                },
                _ => "Usage: /my_files <code>[page]</code>".to_string(),
            },
            "search" => match command.arg.as_deref() {
                Some(query) => self.list(user_id, Some(query), 1).await?,
                None => "Usage: /search <code>text</code>".to_string(),
            },
            _ => return Ok(None),
        };
        Ok(Some(reply))
    }

    async fn list(&self, user_id: i64, query: Option<&str>, page: u64) -> Result<String> {
        let FilePage { files, total } = self
            .store
            .list_user_files(user_id, query, page, PAGE_SIZE)
            .await
            .context("listing files")?;

        if total == 0 {
            return Ok(match query {
                Some(query) => format!("🔍 No files match <code>{}</code>.", escape_html(query)),
                None => "📂 You have no stored files yet.".to_string(),
            });
        }
        let pages = total.div_ceil(PAGE_SIZE);
        if files.is_empty() {
            return Ok(format!(
                "📂 There is no page {}, you have {} pages.",
                page, pages
            ));
        }

        let mut text = match query {
            Some(query) => format!(
                "🔍 <b>Files matching</b> <code>{}</code> ({} found)\n",
                escape_html(query),
                total
            ),
            None => format!(
                "📂 <b>My Files</b> (page {}/{}, {} files)\n",
                page, pages, total
            ),
        };
        let first = (page - 1) * PAGE_SIZE;
        for (i, file) in files.iter().enumerate() {
            let id = composite_id(file.owner_id, &file.file_unique_id);
            text.push_str(&format!(
                "\n{}. <code>{}</code> ({})\n    <a href=\"{}\">Get</a> | <a href=\"{}\">Share</a>",
                first + i as u64 + 1,
                escape_html(&file.file_name),
                bytesize::to_string(file.file_size, true),
                escape_html(&self.links.start_link(&format!("ownerget_{}", id))),
                escape_html(&self.links.file_link(&id)),
            ));
        }
        match query {
            None if page < pages => {
                text.push_str(&format!("\n\nNext page: /my_files {}", page + 1))
            }
            Some(_) if total > PAGE_SIZE => {
                text.push_str("\n\nShowing the newest matches, refine the search to see others.")
            }
            _ => {}
        }
        Ok(text)
    }
}
