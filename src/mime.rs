//! Message decoding and MIME handling
//!
//! Turns a [`FetchedMessage`] (envelope + flags + raw literal) into a
//! normalized [`Email`]. Parsing uses `mailparse`; the MIME tree is first
//! classified into [`Part`] values and then folded depth-first. A part that
//! fails to decode is logged and skipped, so decoding always yields a
//! best-effort `Email`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail};
use tracing::warn;

use crate::email::{Attachment, Email};
use crate::errors::{AppError, AppResult};
use crate::store::{EnvelopeData, FetchedMessage};

/// Classified MIME node
#[derive(Debug)]
enum Part {
    /// Displayable leaf with its charset-decoded text
    Inline { content_type: String, text: String },
    /// Leaf with `Content-Disposition: attachment`; `data` is only
    /// materialized when attachments were requested
    Attachment {
        filename: String,
        content_type: String,
        data: Option<Vec<u8>>,
    },
    /// Container whose children are classified independently
    Multipart(Vec<AppResult<Part>>),
}

/// Accumulator for the depth-first fold
#[derive(Debug, Default)]
struct Bodies {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

/// Decode a fetched message
///
/// Envelope data is preferred; when the store sent no envelope the header
/// block of the raw literal is used instead. When several `text/plain` (or
/// `text/html`) leaves exist, the last one in tree order wins.
pub fn decode(fetched: &FetchedMessage, include_attachments: bool) -> Email {
    let raw = fetched.body.as_deref();
    let envelope = match &fetched.envelope {
        Some(env) => env.clone(),
        None => raw.map(envelope_from_headers).unwrap_or_default(),
    };

    let mut bodies = Bodies::default();
    if let Some(raw) = raw {
        match mailparse::parse_mail(raw) {
            Ok(parsed) => fold(classify(&parsed, include_attachments), &mut bodies),
            Err(e) => warn!(seq = fetched.seq, error = %e, "message body is not parseable MIME"),
        }
    }

    Email {
        id: fetched.seq,
        message_id: envelope.message_id.unwrap_or_default().trim().to_owned(),
        from: envelope.from,
        to: envelope.to,
        cc: envelope.cc,
        bcc: envelope.bcc,
        subject: envelope
            .subject
            .as_deref()
            .map(decode_encoded_words)
            .unwrap_or_default(),
        date: envelope.date.as_deref().and_then(parse_date),
        text_body: bodies.text,
        html_body: bodies.html,
        attachments: bodies.attachments,
        flags: fetched.flags.iter().cloned().collect(),
        size: fetched
            .size
            .unwrap_or_else(|| raw.map_or(0, |r| u32::try_from(r.len()).unwrap_or(u32::MAX))),
    }
}

/// Classify a MIME node and, recursively, its children
fn classify(part: &ParsedMail<'_>, include_attachments: bool) -> AppResult<Part> {
    if !part.subparts.is_empty() {
        return Ok(Part::Multipart(
            part.subparts
                .iter()
                .map(|sub| classify(sub, include_attachments))
                .collect(),
        ));
    }

    let content_type = part.ctype.mimetype.to_ascii_lowercase();
    let disp = part.get_content_disposition();
    if matches!(disp.disposition, DispositionType::Attachment) {
        let data = if include_attachments {
            Some(part.get_body_raw().map_err(|e| {
                AppError::Internal(format!("failed decoding attachment body: {e}"))
            })?)
        } else {
            None
        };
        return Ok(Part::Attachment {
            filename: attachment_filename(part, &disp.params).unwrap_or_default(),
            content_type,
            data,
        });
    }

    let text = part
        .get_body()
        .map_err(|e| AppError::Internal(format!("failed decoding {content_type} part: {e}")))?;
    Ok(Part::Inline { content_type, text })
}

/// Depth-first fold; failed children are skipped individually
fn fold(part: AppResult<Part>, acc: &mut Bodies) {
    match part {
        Ok(Part::Inline { content_type, text }) => match content_type.as_str() {
            "text/plain" => acc.text = Some(text),
            "text/html" => acc.html = Some(text),
            _ => {}
        },
        Ok(Part::Attachment {
            filename,
            content_type,
            data: Some(data),
        }) => acc.attachments.push(Attachment {
            filename,
            content_type,
            size: data.len(),
            data,
        }),
        Ok(Part::Attachment { data: None, .. }) => {}
        Ok(Part::Multipart(children)) => {
            for child in children {
                fold(child, acc);
            }
        }
        Err(e) => warn!(error = %e, "skipping undecodable MIME part"),
    }
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
}

/// Build envelope data from the raw header block
fn envelope_from_headers(raw: &[u8]) -> EnvelopeData {
    let Ok((headers, _)) = mailparse::parse_headers(raw) else {
        return EnvelopeData::default();
    };
    let headers = headers.as_slice();
    EnvelopeData {
        date: headers.get_first_value("Date"),
        subject: headers.get_first_value("Subject"),
        message_id: headers.get_first_value("Message-ID"),
        from: header_addresses(headers, "From"),
        to: header_addresses(headers, "To"),
        cc: header_addresses(headers, "Cc"),
        bcc: header_addresses(headers, "Bcc"),
    }
}

/// Bare addresses from every header named `key`, groups flattened
fn header_addresses(headers: &[MailHeader<'_>], key: &str) -> Vec<String> {
    headers
        .get_all_headers(key)
        .into_iter()
        .filter_map(|h| mailparse::addrparse_header(h).ok())
        .flat_map(|list| list.iter().cloned().collect::<Vec<_>>())
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.addr],
            MailAddr::Group(group) => group.addrs.into_iter().map(|info| info.addr).collect(),
        })
        .collect()
}

/// Decode RFC 2047 encoded words by round-tripping through a header parse
fn decode_encoded_words(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_owned();
    }
    let fake_header = format!("Subject: {value}");
    match mailparse::parse_header(fake_header.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_owned(),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let ts = mailparse::dateparse(value).ok()?;
    DateTime::from_timestamp(ts, 0)
}
