//! Turns a closed batch into one or more channel posts.

use std::sync::Arc;

use crate::links::{composite_id, LinkBuilder};
use crate::models::{FileRecord, UserSettings};
use crate::parser::{self, UNTITLED};
use crate::poster::PosterLookup;
use crate::similarity::compare_to_anchor;
use crate::transport::{ButtonRows, UrlButton};

/// Caption limit for media messages.
pub const PHOTO_CAPTION_LIMIT: usize = 1024;
/// Limit for plain text messages.
pub const TEXT_MESSAGE_LIMIT: usize = 4096;

const HEADER_LINE: &str = "▰▱▰▱▰▱▰▱▰▱▰▱▰▱▰▱▰▱";
const FOOTER_LINE: &str = "•·•·•·•·•·•·•·•·•·•·•·•";
const BLOCK_SEPARATOR: &str = "\n\n";
/// Longest escape [`escape_html`] produces for one character (`&quot;`).
const MAX_ESCAPED_CHAR_LEN: usize = 6;

/// A message ready to be sent to every post channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub poster: Option<String>,
    pub caption: String,
    pub buttons: Option<ButtonRows>,
}

pub struct Composer {
    links: LinkBuilder,
    posters: Option<Arc<dyn PosterLookup>>,
}

impl Composer {
    pub fn new(links: LinkBuilder, posters: Option<Arc<dyn PosterLookup>>) -> Self {
        Self { links, posters }
    }

    /// Build the posts for `files`, given in arrival order.
    pub async fn compose(&self, settings: &UserSettings, files: &[FileRecord]) -> Vec<Post> {
        let Some(first) = files.first() else {
            return Vec::new();
        };

        let primary = parser::parse(&first.file_name);
        let mut title = parser::strip_promotions(&primary.base_title);
        if title.is_empty() {
            title = UNTITLED.to_string();
        }

        let poster = match (&self.posters, settings.show_poster) {
            (Some(posters), true) => posters.find_poster(&title, primary.year.as_deref()).await,
            _ => None,
        };
        let budget = if poster.is_some() {
            PHOTO_CAPTION_LIMIT
        } else {
            TEXT_MESSAGE_LIMIT
        };

        let entries: Vec<Entry> = order_files(&title, files)
            .into_iter()
            .map(|file| self.entry(file))
            .collect();

        // The header may only take what is left once the largest title-less block fits.
        let min_block = entries
            .iter()
            .map(|entry| text_len(&format_block("", &entry.tags, &entry.link)))
            .max()
            .unwrap_or(0);
        let header_room = budget
            .saturating_sub(frame_len("", Some(widest_part_suffix())))
            .saturating_sub(text_len(BLOCK_SEPARATOR))
            .saturating_sub(min_block);
        let header = fit_header(&title, primary.year.as_deref(), header_room);

        let max_block = budget
            .saturating_sub(frame_len(&header, Some(widest_part_suffix())))
            .saturating_sub(text_len(BLOCK_SEPARATOR));
        let blocks: Vec<String> = entries
            .iter()
            .map(|entry| render_block(&entry.display, &entry.tags, &entry.link, max_block))
            .collect();

        let buttons = footer_buttons(settings);
        build_captions(&header, &blocks, budget)
            .into_iter()
            .map(|caption| Post {
                poster: poster.clone(),
                caption,
                buttons: buttons.clone(),
            })
            .collect()
    }

    fn entry(&self, file: &FileRecord) -> Entry {
        let parsed = parser::parse(&file.file_name);
        let mut display = parser::strip_promotions(&parsed.display_title);
        if display.is_empty() {
            display = file.file_name.clone();
        }
        Entry {
            display,
            tags: parsed.tags,
            link: self
                .links
                .file_link(&composite_id(file.owner_id, &file.file_unique_id)),
        }
    }
}

/// One file as it will be listed in a post.
struct Entry {
    display: String,
    tags: Vec<String>,
    link: String,
}

/// Most similar to `anchor` first, ties in natural filename order.
pub fn order_files<'a>(anchor: &str, files: &'a [FileRecord]) -> Vec<&'a FileRecord> {
    let mut keyed: Vec<(String, &FileRecord)> = files
        .iter()
        .map(|file| {
            let base = parser::strip_promotions(&parser::parse(&file.file_name).base_title);
            (base, file)
        })
        .collect();
    keyed.sort_by(|(base_a, a), (base_b, b)| {
        compare_to_anchor(
            anchor,
            (base_a.as_str(), a.file_name.as_str()),
            (base_b.as_str(), b.file_name.as_str()),
        )
    });
    keyed.into_iter().map(|(_, file)| file).collect()
}

fn footer_buttons(settings: &UserSettings) -> Option<ButtonRows> {
    if settings.footer_buttons.is_empty() {
        return None;
    }
    Some(
        settings
            .footer_buttons
            .iter()
            .map(|b| {
                vec![UrlButton {
                    text: b.name.clone(),
                    url: b.url.clone(),
                }]
            })
            .collect(),
    )
}

/// Caption length as the platform counts it.
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_block(display: &str, tags: &[String], link: &str) -> String {
    let mut block = format!("📁 <code>{}</code>", escape_html(display));
    let tags: Vec<&str> = tags
        .iter()
        .map(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.is_empty() {
        block.push_str(&format!("\n    <code>{}</code>", escape_html(&tags.join(" | "))));
    }
    block.push_str(&format!(
        "\n    <a href=\"{}\">➤ Click Here</a>",
        escape_html(link)
    ));
    block
}

/// Render one file entry, shortening the display title until it fits `max_len`.
fn render_block(display: &str, tags: &[String], link: &str, max_len: usize) -> String {
    shrink_to_fit(display, max_len, |display| format_block(display, tags, link))
}

/// Post title with its year, shortened to at most `max_len`.
fn fit_header(title: &str, year: Option<&str>, max_len: usize) -> String {
    shrink_to_fit(title, max_len, |title| match year {
        Some(year) => format!("{} ({})", escape_html(title), year),
        None => escape_html(title),
    })
}

/// Cut `text` down, ending it with `…`, until `render(text)` is at most `max_len`
/// long or nothing is left to cut.
fn shrink_to_fit(text: &str, max_len: usize, render: impl Fn(&str) -> String) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut keep = chars.len();
    let mut rendered = render(text);
    while text_len(&rendered) > max_len && keep > 0 {
        let excess = text_len(&rendered) - max_len;
        keep = keep.saturating_sub(excess.div_ceil(MAX_ESCAPED_CHAR_LEN).max(1));
        let shortened: String = if keep == 0 {
            String::new()
        } else {
            chars[..keep].iter().chain(Some(&'…')).collect()
        };
        rendered = render(&shortened);
    }
    rendered
}

fn part_suffix(part: usize, total: usize) -> String {
    format!(" (Part {}/{})", part, total)
}

fn widest_part_suffix() -> &'static str {
    " (Part 999/999)"
}

fn caption_top(header: &str, suffix: &str) -> String {
    format!("{HEADER_LINE}\n🎬 <b>{header}{suffix}</b>\n{HEADER_LINE}")
}

/// Length of a caption with no blocks, including the separators around the body.
fn frame_len(header: &str, suffix: Option<&str>) -> usize {
    text_len(&caption_top(header, suffix.unwrap_or("")))
        + text_len(BLOCK_SEPARATOR)
        + text_len(FOOTER_LINE)
}

fn render_caption(header: &str, suffix: &str, blocks: &[&String]) -> String {
    let body: Vec<&str> = blocks.iter().map(|b| b.as_str()).collect();
    format!(
        "{}{sep}{}{sep}{}",
        caption_top(header, suffix),
        body.join(BLOCK_SEPARATOR),
        FOOTER_LINE,
        sep = BLOCK_SEPARATOR
    )
}

/// Greedy packing: each page takes blocks while the caption stays within `budget`.
fn pack<'a>(fixed: usize, blocks: &'a [String], budget: usize) -> Vec<Vec<&'a String>> {
    let separator = text_len(BLOCK_SEPARATOR);
    let mut pages = Vec::new();
    let mut current: Vec<&String> = Vec::new();
    let mut used = fixed;

    for block in blocks {
        let cost = text_len(block) + separator;
        if !current.is_empty() && used + cost > budget {
            pages.push(std::mem::take(&mut current));
            used = fixed;
        }
        current.push(block);
        used += cost;
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// Split `blocks` into captions no longer than `budget`, numbering them when
/// more than one is needed. Blocks are never split.
pub fn build_captions(header: &str, blocks: &[String], budget: usize) -> Vec<String> {
    let pages = pack(frame_len(header, None), blocks, budget);
    if pages.len() <= 1 {
        return pages
            .iter()
            .map(|page| render_caption(header, "", page))
            .collect();
    }

    // Reserve room for the widest " (Part N/N)" and repack until the page count's
    // width stops growing.
    let mut total = pages.len();
    loop {
        let reserve = part_suffix(total, total);
        let pages = pack(frame_len(header, Some(&reserve)), blocks, budget);
        let count = pages.len();
        if count.to_string().len() <= total.to_string().len() {
            return pages
                .iter()
                .enumerate()
                .map(|(i, page)| render_caption(header, &part_suffix(i + 1, count), page))
                .collect();
        }
        total = count;
    }
}
