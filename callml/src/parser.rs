//! A minimal reader for the CallML markup dialect.
//!
//! This is deliberately small: the grammar the engine actually interprets
//! is the fixed, closed verb set in `crate::types`, and nesting is limited
//! to `Gather` (Say/Play/Pause children) and `Dial` (one target). We first
//! collect the document into a generic element tree with `quick_xml`, then
//! map that tree onto `Document`/`Verb` — that keeps the XML-walking code
//! free of verb-specific branching.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{CallMlError, Result};
use crate::types::{
    ConferenceDial, Dial, DialLeg, DialLegKind, DialTarget, Document, Gather, HttpMethod, Verb,
};

struct Element {
    name: String,
    attrs: HashMap<String, String>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    fn attr_bool(&self, key: &str) -> bool {
        matches!(self.attr(key), Some("true") | Some("1"))
    }

    fn attr_u32(&self, verb: &'static str, key: &'static str) -> Result<Option<u32>> {
        match self.attr(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<u32>()
                .map(Some)
                .map_err(|_| CallMlError::InvalidAttribute {
                    verb,
                    attr: key,
                    value: v.to_string(),
                }),
        }
    }

    fn method(&self) -> HttpMethod {
        match self.attr("method").map(|m| m.to_ascii_uppercase()) {
            Some(ref m) if m == "GET" => HttpMethod::Get,
            _ => HttpMethod::Post,
        }
    }
}

/// Parse a CallML document from its XML source.
pub fn parse(xml: &str) -> Result<Document> {
    let root = read_tree(xml)?;
    if root.name != "Response" {
        return Err(CallMlError::MissingResponseRoot(root.name));
    }
    let verbs = root
        .children
        .iter()
        .map(element_to_verb)
        .collect::<Result<Vec<_>>>()?;
    Ok(Document::new(verbs))
}

fn read_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = vec![Element {
        name: "#document".to_string(),
        attrs: HashMap::new(),
        text: String::new(),
        children: Vec::new(),
    }];

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = HashMap::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.decode_and_unescape_value(&reader)?.into_owned();
                    attrs.insert(key, value);
                }
                stack.push(Element {
                    name,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = HashMap::new();
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.decode_and_unescape_value(&reader)?.into_owned();
                    attrs.insert(key, value);
                }
                let elem = Element {
                    name,
                    attrs,
                    text: String::new(),
                    children: Vec::new(),
                };
                stack.last_mut().expect("root always present").children.push(elem);
            }
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let finished = stack.pop().expect("matching start for every end");
                stack
                    .last_mut()
                    .expect("root never popped")
                    .children
                    .push(finished);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut root = stack.pop().expect("root always present");
    root.children
        .pop()
        .ok_or_else(|| CallMlError::MissingResponseRoot("".to_string()))
        .map(|response| {
            // fold any stray document-level attrs/text into the element.
            let _ = &mut root;
            response
        })
}

fn element_to_verb(el: &Element) -> Result<Verb> {
    match el.name.as_str() {
        "Say" => Ok(Verb::Say {
            text: el.text.trim().to_string(),
            voice: el.attr("voice").map(str::to_string),
            language: el.attr("language").map(str::to_string),
            loop_count: el.attr_u32("Say", "loop")?.unwrap_or(1),
        }),
        "Play" => Ok(Verb::Play {
            url: el.text.trim().to_string(),
            loop_count: el.attr_u32("Play", "loop")?.unwrap_or(1),
        }),
        "Pause" => Ok(Verb::Pause {
            length_secs: el.attr_u32("Pause", "length")?.unwrap_or(1),
        }),
        "Hangup" => Ok(Verb::Hangup),
        "Redirect" => Ok(Verb::Redirect {
            url: el.text.trim().to_string(),
            method: el.method(),
        }),
        "Record" => Ok(Verb::Record {
            max_length_secs: el.attr_u32("Record", "maxLength")?.unwrap_or(3600),
            timeout_secs: el.attr_u32("Record", "timeout")?.unwrap_or(5),
            play_beep: el.attr("playBeep").map(|v| v != "false").unwrap_or(true),
            action: el.attr("action").map(str::to_string),
            method: el.method(),
            transcribe: el.attr_bool("transcribe"),
        }),
        "Enqueue" => Ok(Verb::Enqueue {
            name: el.text.trim().to_string(),
            action: el.attr("action").map(str::to_string),
            method: el.method(),
            wait_url: el.attr("waitUrl").map(str::to_string),
        }),
        "Gather" => {
            let mut children = Vec::with_capacity(el.children.len());
            for child in &el.children {
                match child.name.as_str() {
                    "Say" | "Play" | "Pause" => children.push(element_to_verb(child)?),
                    other => {
                        return Err(CallMlError::IllegalChild {
                            parent: "Gather",
                            child: other.to_string(),
                        })
                    }
                }
            }
            Ok(Verb::Gather(Gather {
                timeout: el.attr("timeout").map(str::to_string),
                num_digits: el.attr_u32("Gather", "numDigits")?,
                finish_on_key: el.attr("finishOnKey").map(str::to_string),
                action: el.attr("action").map(str::to_string),
                method: el.method(),
                children,
            }))
        }
        "Dial" => {
            let mut queue = None;
            let mut conference = None;
            let mut legs = Vec::new();
            for child in &el.children {
                match child.name.as_str() {
                    "Queue" => queue = Some(child.text.trim().to_string()),
                    "Conference" => {
                        conference = Some(ConferenceDial {
                            name: child.text.trim().to_string(),
                            muted: child.attr_bool("muted"),
                            start_conference_on_enter: child
                                .attr("startConferenceOnEnter")
                                .map(|v| v != "false")
                                .unwrap_or(true),
                            end_conference_on_exit: child
                                .attr("endConferenceOnExit")
                                .map(|v| v != "false")
                                .unwrap_or(false),
                            hold_url: child.attr("waitUrl").map(str::to_string),
                            hold_method: child.method(),
                            status_callback: child.attr("statusCallback").map(str::to_string),
                            status_callback_events: child
                                .attr("statusCallbackEvent")
                                .map(|v| v.split(' ').map(str::to_string).collect())
                                .unwrap_or_default(),
                        })
                    }
                    "Number" => legs.push(DialLeg {
                        kind: DialLegKind::Number,
                        address: child.text.trim().to_string(),
                    }),
                    "Client" => legs.push(DialLeg {
                        kind: DialLegKind::Client,
                        address: child.text.trim().to_string(),
                    }),
                    "Sip" => legs.push(DialLeg {
                        kind: DialLegKind::Sip,
                        address: child.text.trim().to_string(),
                    }),
                    other => {
                        return Err(CallMlError::IllegalChild {
                            parent: "Dial",
                            child: other.to_string(),
                        })
                    }
                }
            }
            // A bare number as the element's own text, e.g. <Dial>+15551234</Dial>.
            if !el.text.trim().is_empty() {
                legs.push(DialLeg {
                    kind: DialLegKind::Number,
                    address: el.text.trim().to_string(),
                });
            }

            let target = match (queue, conference, legs.is_empty()) {
                (Some(q), None, true) => DialTarget::Queue(q),
                (None, Some(c), true) => DialTarget::Conference(c),
                (None, None, false) => DialTarget::Legs(legs),
                (None, None, true) => return Err(CallMlError::EmptyDialTarget),
                _ => return Err(CallMlError::AmbiguousDialTarget),
            };

            Ok(Verb::Dial(Dial {
                target,
                timeout_secs: el.attr_u32("Dial", "timeout")?,
                hangup_on_star: el.attr_bool("hangupOnStar"),
                action: el.attr("action").map(str::to_string),
                method: el.method(),
            }))
        }
        other => Err(CallMlError::UnknownVerb(other.to_string())),
    }
}
