//! Notification bodies in text, markdown and HTML.

use pulldown_cmark::{html, Options, Parser};

use super::ReleaseNotification;
use crate::settings::NotificationFormat;

/// User-facing strings of a notification.
#[derive(Debug)]
pub struct Labels {
    pub new_release: &'static str,
    pub repository: &'static str,
    pub release: &'static str,
    pub tag: &'static str,
    pub published: &'static str,
    pub release_notes: &'static str,
    pub no_release_notes: &'static str,
    pub view_on_web: &'static str,
}

static EN: Labels = Labels {
    new_release: "New release",
    repository: "Repository",
    release: "Release",
    tag: "Tag",
    published: "Published",
    release_notes: "Release notes",
    no_release_notes: "No release notes provided.",
    view_on_web: "View release on the web",
};

static DE: Labels = Labels {
    new_release: "Neues Release",
    repository: "Repository",
    release: "Release",
    tag: "Tag",
    published: "Veröffentlicht",
    release_notes: "Versionshinweise",
    no_release_notes: "Keine Versionshinweise vorhanden.",
    view_on_web: "Release im Web ansehen",
};

/// Labels for a locale such as `de` or `de-AT`. Unknown locales get English.
pub fn labels(locale: &str) -> &'static Labels {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match language.as_str() {
        "de" => &DE,
        _ => &EN,
    }
}

pub fn title(n: &ReleaseNotification) -> String {
    format!(
        "{}: {} {}",
        labels(&n.locale).new_release,
        n.repo_name,
        n.release.tag_name
    )
}

/// Renders the body in `format`, applying the character budget to text and
/// markdown. HTML is never truncated.
pub fn body(n: &ReleaseNotification, format: NotificationFormat, max_characters: usize) -> String {
    match format {
        NotificationFormat::Text => text(n, max_characters),
        NotificationFormat::Markdown => markdown(n, max_characters),
        NotificationFormat::Html => html_document(n),
    }
}

fn published(n: &ReleaseNotification) -> String {
    n.release
        .published_at
        .or(n.release.created_at)
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn release_body(n: &ReleaseNotification) -> Option<&str> {
    n.release.body.as_deref().map(str::trim).filter(|b| !b.is_empty())
}

/// Plain-text summary followed by the raw release notes.
pub fn text(n: &ReleaseNotification, max_characters: usize) -> String {
    let l = labels(&n.locale);
    let mut out = format!(
        "{}\n\n{}: {}\n{}: {}\n{}: {}\n{}: {}\nURL: {}\n",
        title(n),
        l.repository,
        n.repo_name,
        l.release,
        n.release.display_name(),
        l.tag,
        n.release.tag_name,
        l.published,
        published(n),
        n.release.html_url,
    );
    out.push('\n');
    out.push_str(release_body(n).unwrap_or(l.no_release_notes));

    if max_characters > 0 {
        truncate_chars(&out, max_characters)
    } else {
        out
    }
}

/// Header, release notes and a "view on the web" footer.
///
/// When the budget is exceeded, header and notes are cut to whatever the
/// footer leaves over. If the footer alone uses up the budget, only the bare
/// link is returned.
pub fn markdown(n: &ReleaseNotification, max_characters: usize) -> String {
    let l = labels(&n.locale);
    let link = format!("[{}]({})", l.view_on_web, n.release.html_url);
    let footer = format!("\n\n{}", link);
    let notes = release_body(n)
        .map(str::to_string)
        .unwrap_or_else(|| format!("*{}*", l.no_release_notes));
    let content = format!("### {}\n\n{notes}", title(n));

    if max_characters == 0 || char_len(&content) + char_len(&footer) <= max_characters {
        return format!("{content}{footer}");
    }

    let Some(remaining) = max_characters.checked_sub(char_len(&footer)).filter(|r| *r > 0) else {
        return link;
    };

    format!("{}{footer}", truncate_with_ellipsis(&content, remaining))
}

/// Full HTML document with inline styles, suitable for email clients.
pub fn html_document(n: &ReleaseNotification) -> String {
    let l = labels(&n.locale);
    let notes = match release_body(n) {
        Some(body) => markdown_to_html(body),
        None => format!(
            "<p style=\"color:#6a737d;\"><em>{}</em></p>",
            escape_html(l.no_release_notes)
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
</head>
<body style="margin:0;padding:20px;background-color:#f6f8fa;font-family:-apple-system,Segoe UI,Helvetica,Arial,sans-serif;color:#24292f;">
    <div style="max-width:680px;margin:0 auto;background-color:#ffffff;border:1px solid #d0d7de;border-radius:6px;">
        <div style="padding:16px 24px;border-bottom:1px solid #d0d7de;">
            <h2 style="margin:0;font-size:20px;">{title}</h2>
        </div>
        <table style="margin:16px 24px;border-collapse:collapse;font-size:14px;">
            <tr><td style="padding:2px 12px 2px 0;color:#57606a;">{repository_label}</td><td><a href="{repo_url}" style="color:#0969da;">{repo_name}</a></td></tr>
            <tr><td style="padding:2px 12px 2px 0;color:#57606a;">{release_label}</td><td>{release_name}</td></tr>
            <tr><td style="padding:2px 12px 2px 0;color:#57606a;">{tag_label}</td><td><code>{tag}</code></td></tr>
            <tr><td style="padding:2px 12px 2px 0;color:#57606a;">{published_label}</td><td>{published}</td></tr>
        </table>
        <div style="padding:0 24px 16px 24px;font-size:14px;line-height:1.5;">
            <h3 style="font-size:16px;border-bottom:1px solid #d0d7de;padding-bottom:4px;">{notes_label}</h3>
            {notes}
        </div>
        <div style="padding:16px 24px;border-top:1px solid #d0d7de;">
            <a href="{release_url}" style="display:inline-block;padding:6px 16px;background-color:#1f883d;color:#ffffff;text-decoration:none;border-radius:6px;">{view_label}</a>
        </div>
    </div>
</body>
</html>"#,
        title = escape_html(&title(n)),
        repository_label = escape_html(l.repository),
        repo_url = escape_html(&n.repo_url),
        repo_name = escape_html(&n.repo_name),
        release_label = escape_html(l.release),
        release_name = escape_html(n.release.display_name()),
        tag_label = escape_html(l.tag),
        tag = escape_html(&n.release.tag_name),
        published_label = escape_html(l.published),
        published = escape_html(&published(n)),
        notes_label = escape_html(l.release_notes),
        notes = notes,
        release_url = escape_html(&n.release.html_url),
        view_label = escape_html(l.view_on_web),
    )
}

/// Converts markdown release notes to HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
