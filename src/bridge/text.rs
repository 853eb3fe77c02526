//! Text conversion between the remote platform's html bodies and gateway markdown.

use base64::{Engine, engine::general_purpose::STANDARD};
use pulldown_cmark::{Options, Parser, html};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::{
    base::types::Res,
    gateway::FileAttachment,
    service::teams::{BodyKind, HostedContent, MentionKind, OutgoingMention, RemoteMessage},
};

/// Image types that can be embedded inline in a message body.
const INLINE_IMAGE_TYPES: [&str; 3] = ["image/jpg", "image/jpeg", "image/png"];

/// Converts message text in both directions.
///
/// All patterns are compiled once, when the bridge is created.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    attachment_tag: Regex,
    remote_mention: Regex,
    gateway_mention: Regex,
}

impl MessageFormatter {
    /// Creates a formatter stripping attachment placeholders matching `attachment_tag_pattern`.
    pub fn new(attachment_tag_pattern: &str) -> Res<Self> {
        Ok(Self {
            attachment_tag: Regex::new(attachment_tag_pattern)?,
            remote_mention: Regex::new(r#"<at id="(\d+)">(.*?)</at>"#)?,
            gateway_mention: Regex::new(r"(^|\s)@([^@\s]+)")?,
        })
    }

    // Remote to gateway.

    /// Renders a remote body as gateway text: attachment placeholders removed, mentions
    /// turned into `@name` / `@channel`, and html converted to markdown.
    pub fn to_gateway_text(&self, message: &RemoteMessage) -> String {
        let text = self.attachment_tag.replace_all(&message.body, "");
        let text = self.resolve_mentions(&text, message);

        match message.body_kind {
            BodyKind::Html => html_to_markdown(&text),
            BodyKind::Text => text,
        }
    }

    fn resolve_mentions(&self, text: &str, message: &RemoteMessage) -> String {
        self.remote_mention
            .replace_all(text, |caps: &Captures| {
                let shown = &caps[2];
                let mention = caps[1].parse::<i64>().ok().and_then(|id| message.mentions.iter().find(|m| m.id == id));

                match mention {
                    Some(m) if m.kind == MentionKind::Channel => "@channel".to_string(),
                    Some(m) if !m.mention_text.is_empty() => format!("@{}", m.mention_text),
                    _ => format!("@{shown}"),
                }
            })
            .into_owned()
    }

    // Gateway to remote.

    /// Rewrites every `@channel` / `@all` token into inline mention markup and returns the
    /// matching descriptors. Any other `@name` stays plain text.
    pub fn encode_mentions(&self, text: &str, channel_id: &str) -> (String, Vec<OutgoingMention>) {
        let mut mentions = Vec::new();

        let encoded = self
            .gateway_mention
            .replace_all(text, |caps: &Captures| {
                let token = &caps[2];

                if !matches!(token, "channel" | "all") {
                    return caps[0].to_string();
                }

                let id = mentions.len();

                mentions.push(OutgoingMention {
                    id,
                    mention_text: token.to_string(),
                    channel_id: channel_id.to_string(),
                });

                format!(r#"{}<at id="{}">{}</at>"#, &caps[1], id, token)
            })
            .into_owned();

        debug!("Encoded {} mentions.", mentions.len());

        (encoded, mentions)
    }

    /// Appends every file to `html`: images inline through hosted contents, anything else as
    /// a placeholder note.
    pub fn encode_attachments(&self, html: &mut String, files: &[FileAttachment]) -> Vec<HostedContent> {
        let mut hosted = Vec::new();

        for (index, file) in files.iter().enumerate() {
            let content_type = mime_guess::from_path(&file.name).first().map(|m| m.essence_str().to_string()).unwrap_or_default();

            if INLINE_IMAGE_TYPES.contains(&content_type.as_str()) {
                let temporary_id = index.to_string();

                html.push_str(&format!(r#"<img src="../hostedContents/{temporary_id}/$value">"#));

                hosted.push(HostedContent {
                    temporary_id,
                    content_type,
                    content_bytes: STANDARD.encode(&file.data),
                });
            } else {
                debug!("Not attaching `{}` of type `{}`.", file.name, content_type);

                html.push_str(&format!("<br>File {} was not attached.", file.name));
            }
        }

        hosted
    }
}

/// Converts an html body to markdown, passing the input through if conversion fails.
pub fn html_to_markdown(text: &str) -> String {
    match html_to_markdown_rs::convert(text, None) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(e) => {
            warn!("Couldn't convert message to markdown: {}", e);
            text.to_string()
        }
    }
}

/// Escapes text for literal inclusion in an html body.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }

    out
}

/// Renders gateway markdown as html.
pub fn markdown_to_html(text: &str) -> String {
    let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);

    let mut out = String::new();
    html::push_html(&mut out, parser);

    out
}

// Tests.
