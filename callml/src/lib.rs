//! Types and a small reader for CallML, the markup dialect that call-flow
//! webhooks return. The engine crate only depends on the types here; it
//! is always handed an already-parsed [`Document`], matching the source
//! system's boundary where the markup grammar is an external collaborator
//! of the per-call execution engine.

mod error;
mod parser;
mod types;

pub use error::{CallMlError, Result};
pub use parser::parse;
pub use types::{
    ConferenceDial, Dial, DialLeg, DialLegKind, DialTarget, Document, Gather, HttpMethod, Verb,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_say_and_hangup() {
        let doc = parse(r#"<Response><Say>hello</Say><Hangup/></Response>"#).unwrap();
        assert_eq!(doc.verbs.len(), 2);
        assert!(matches!(&doc.verbs[0], Verb::Say { text, .. } if text == "hello"));
        assert!(matches!(doc.verbs[1], Verb::Hangup));
    }

    #[test]
    fn parses_gather_with_say_child() {
        let doc = parse(
            r#"<Response><Gather numDigits="5" finishOnKey="#" action="/g"><Say>pin</Say></Gather></Response>"#,
        )
        .unwrap();
        match &doc.verbs[0] {
            Verb::Gather(g) => {
                assert_eq!(g.num_digits, Some(5));
                assert_eq!(g.finish_on_key.as_deref(), Some("#"));
                assert_eq!(g.action.as_deref(), Some("/g"));
                assert_eq!(g.children.len(), 1);
            }
            other => panic!("expected Gather, got {other:?}"),
        }
    }

    #[test]
    fn gather_rejects_dial_child() {
        let err = parse(r#"<Response><Gather><Dial>+15551234</Dial></Gather></Response>"#)
            .unwrap_err();
        assert!(matches!(err, CallMlError::IllegalChild { parent: "Gather", .. }));
    }

    #[test]
    fn parses_dial_queue() {
        let doc = parse(r#"<Response><Dial><Queue>support</Queue></Dial></Response>"#).unwrap();
        match &doc.verbs[0] {
            Verb::Dial(d) => assert_eq!(d.target, DialTarget::Queue("support".to_string())),
            other => panic!("expected Dial, got {other:?}"),
        }
    }

    #[test]
    fn parses_dial_conference_attrs() {
        let doc = parse(
            r#"<Response><Dial><Conference startConferenceOnEnter="false" endConferenceOnExit="true">room</Conference></Dial></Response>"#,
        )
        .unwrap();
        match &doc.verbs[0] {
            Verb::Dial(d) => match &d.target {
                DialTarget::Conference(c) => {
                    assert_eq!(c.name, "room");
                    assert!(!c.start_conference_on_enter);
                    assert!(c.end_conference_on_exit);
                }
                other => panic!("expected Conference target, got {other:?}"),
            },
            other => panic!("expected Dial, got {other:?}"),
        }
    }

    #[test]
    fn parses_dial_numbers_and_hangup_on_star() {
        let doc =
            parse(r#"<Response><Dial hangupOnStar="true" timeout="10">+15559990000</Dial></Response>"#)
                .unwrap();
        match &doc.verbs[0] {
            Verb::Dial(d) => {
                assert!(d.hangup_on_star);
                assert_eq!(d.timeout_secs, Some(10));
                assert_eq!(
                    d.target,
                    DialTarget::Legs(vec![DialLeg {
                        kind: DialLegKind::Number,
                        address: "+15559990000".to_string(),
                    }])
                );
            }
            other => panic!("expected Dial, got {other:?}"),
        }
    }

    #[test]
    fn dial_rejects_mixed_targets() {
        let err = parse(
            r#"<Response><Dial><Queue>support</Queue><Number>+1555</Number></Dial></Response>"#,
        )
        .unwrap_err();
        assert!(matches!(err, CallMlError::AmbiguousDialTarget));
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = parse(r#"<Response><Teleport/></Response>"#).unwrap_err();
        assert!(matches!(err, CallMlError::UnknownVerb(tag) if tag == "Teleport"));
    }

    #[test]
    fn rejects_non_response_root() {
        let err = parse(r#"<Document><Say>hi</Say></Document>"#).unwrap_err();
        assert!(matches!(err, CallMlError::MissingResponseRoot(tag) if tag == "Document"));
    }

    #[test]
    fn empty_document_has_no_verbs() {
        let doc = parse(r#"<Response></Response>"#).unwrap();
        assert!(doc.is_empty());
    }

    proptest::proptest! {
        /// Attributes land in a `HashMap` while reading the element tree, so
        /// their order in the source text must not affect the parsed verb.
        #[test]
        fn gather_attribute_order_does_not_affect_parse(swap in proptest::bool::ANY) {
            let (a, b) = if swap {
                (r#"finishOnKey="#" numDigits="4""#, r#"numDigits="4" finishOnKey="#""#)
            } else {
                (r#"numDigits="4" finishOnKey="#""#, r#"finishOnKey="#" numDigits="4""#)
            };
            let first = parse(&format!(r#"<Response><Gather {a}><Say>hi</Say></Gather></Response>"#)).unwrap();
            let second = parse(&format!(r#"<Response><Gather {b}><Say>hi</Say></Gather></Response>"#)).unwrap();
            match (&first.verbs[0], &second.verbs[0]) {
                (Verb::Gather(g1), Verb::Gather(g2)) => {
                    prop_assert_eq!(g1.num_digits, g2.num_digits);
                    prop_assert_eq!(&g1.finish_on_key, &g2.finish_on_key);
                }
                _ => prop_assert!(false, "expected both documents to parse as Gather"),
            }
        }
    }
}
