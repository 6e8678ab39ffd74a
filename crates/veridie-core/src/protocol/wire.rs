//! Wire codec for peer-to-peer messages
//!
//! The wire form is a small XML dialect with four root elements:
//!
//! ```text
//! <Hello><Mac>ADDR</Mac></Hello>
//! <Offer round="N"><Mac>ADDR</Mac></Offer>
//! <Request type="DK" size="N" successFrom="T"/>
//! <Response type="DK" size="N" successCount="S"><Val>v</Val>…</Response>
//! ```
//!
//! `successFrom` and `successCount` are optional. Request casts are always
//! zeroed on the wire; only responses carry filled values. The codec is
//! pluggable behind [`MessageCodec`]; any implementation must round-trip
//! every message losslessly.

use std::fmt::Write as _;

use crate::dice::{Cast, Die};
use crate::errors::ParseError;
use crate::protocol::message::{Hello, Message, Offer, Request, Response};

// ----------------------------------------------------------------------------
// Codec Trait
// ----------------------------------------------------------------------------

/// Converts protocol messages to and from their textual wire form
pub trait MessageCodec {
    fn encode(&self, message: &Message) -> String;
    fn decode(&self, text: &str) -> Result<Message, ParseError>;
}

// ----------------------------------------------------------------------------
// XML Codec
// ----------------------------------------------------------------------------

/// The reference wire encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl MessageCodec for XmlCodec {
    fn encode(&self, message: &Message) -> String {
        match message {
            Message::Hello(hello) => {
                format!("<Hello><Mac>{}</Mac></Hello>", hello.mac)
            }
            Message::Offer(offer) => {
                format!(
                    "<Offer round=\"{}\"><Mac>{}</Mac></Offer>",
                    offer.round, offer.mac
                )
            }
            Message::Request(request) => {
                let mut out = format!(
                    "<Request type=\"{}\" size=\"{}\"",
                    request.cast.die(),
                    request.cast.len()
                );
                if let Some(threshold) = request.threshold {
                    let _ = write!(out, " successFrom=\"{threshold}\"");
                }
                out.push_str("/>");
                out
            }
            Message::Response(response) => {
                let mut out = format!(
                    "<Response type=\"{}\" size=\"{}\"",
                    response.cast.die(),
                    response.cast.len()
                );
                if let Some(count) = response.success_count {
                    let _ = write!(out, " successCount=\"{count}\"");
                }
                out.push('>');
                for value in response.cast.values() {
                    let _ = write!(out, "<Val>{value}</Val>");
                }
                out.push_str("</Response>");
                out
            }
        }
    }

    fn decode(&self, text: &str) -> Result<Message, ParseError> {
        let mut scanner = Scanner::new(text);
        scanner.skip_ws();
        scanner.expect("<")?;
        let name = scanner.read_name()?;
        let (attrs, self_closed) = scanner.read_attrs()?;

        match name {
            "Hello" => {
                if self_closed {
                    return Err(ParseError::malformed("Hello without a Mac element"));
                }
                let mac = read_mac_element(&mut scanner)?;
                scanner.expect("</Hello>")?;
                Ok(Message::Hello(Hello { mac }))
            }
            "Offer" => {
                let round = parse_number(require_attr(&attrs, "round")?)?;
                if self_closed {
                    return Err(ParseError::malformed("Offer without a Mac element"));
                }
                let mac = read_mac_element(&mut scanner)?;
                scanner.expect("</Offer>")?;
                Ok(Message::Offer(Offer { mac, round }))
            }
            "Request" => {
                let (die, size) = read_cast_shape(&attrs)?;
                let threshold = match find_attr(&attrs, "successFrom") {
                    Some(value) => Some(parse_number(value)?),
                    None => None,
                };
                if !self_closed {
                    scanner.expect("</Request>")?;
                }
                Ok(Message::Request(Request {
                    cast: Cast::zeroed(die, size as usize),
                    threshold,
                }))
            }
            "Response" => {
                let (die, size) = read_cast_shape(&attrs)?;
                let success_count = match find_attr(&attrs, "successCount") {
                    Some(value) => Some(parse_number(value)?),
                    None => None,
                };
                let mut values = Vec::with_capacity(size as usize);
                if !self_closed {
                    for _ in 0..size {
                        scanner.expect("<Val>")?;
                        values.push(parse_number(scanner.read_until('<')?)?);
                        scanner.expect("</Val>")?;
                    }
                    scanner.expect("</Response>")?;
                }
                if values.len() != size as usize {
                    return Err(ParseError::malformed(format!(
                        "Response declares {} values but carries {}",
                        size,
                        values.len()
                    )));
                }
                Ok(Message::Response(Response {
                    cast: Cast::with_values(die, values),
                    success_count,
                }))
            }
            other => Err(ParseError::UnknownElement(other.to_string())),
        }
    }
}

// ----------------------------------------------------------------------------
// Parsing Helpers
// ----------------------------------------------------------------------------

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, token: &str) -> bool {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ParseError::malformed(format!("expected `{token}`")))
        }
    }

    fn read_name(&mut self) -> Result<&'a str, ParseError> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(ParseError::malformed("expected a name"));
        }
        let (name, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(name)
    }

    fn read_until(&mut self, stop: char) -> Result<&'a str, ParseError> {
        match self.rest.find(stop) {
            Some(index) => {
                let (text, rest) = self.rest.split_at(index);
                self.rest = rest;
                Ok(text)
            }
            None => Err(ParseError::malformed(format!("missing `{stop}`"))),
        }
    }

    fn read_attrs(&mut self) -> Result<(Vec<(&'a str, &'a str)>, bool), ParseError> {
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            if self.eat("/>") {
                return Ok((attrs, true));
            }
            if self.eat(">") {
                return Ok((attrs, false));
            }
            let name = self.read_name()?;
            self.expect("=\"")?;
            let value = self.read_until('"')?;
            self.expect("\"")?;
            attrs.push((name, value));
        }
    }
}

fn find_attr<'a>(attrs: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(attr, _)| *attr == name)
        .map(|(_, value)| *value)
}

fn require_attr<'a>(
    attrs: &[(&'a str, &'a str)],
    name: &'static str,
) -> Result<&'a str, ParseError> {
    find_attr(attrs, name).ok_or(ParseError::MissingAttribute(name))
}

fn parse_number(text: &str) -> Result<u32, ParseError> {
    text.parse()
        .map_err(|_| ParseError::malformed(format!("invalid number `{text}`")))
}

fn read_cast_shape(attrs: &[(&str, &str)]) -> Result<(Die, u32), ParseError> {
    let die = require_attr(attrs, "type")?.parse()?;
    let size = parse_number(require_attr(attrs, "size")?)?;
    Ok((die, size))
}

fn read_mac_element(scanner: &mut Scanner<'_>) -> Result<String, ParseError> {
    scanner.skip_ws();
    scanner.expect("<Mac>")?;
    let mac = scanner.read_until('<')?.to_string();
    scanner.expect("</Mac>")?;
    scanner.skip_ws();
    Ok(mac)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let codec = XmlCodec;
        let text = codec.encode(&message);
        assert_eq!(codec.decode(&text).unwrap(), message, "wire form: {text}");
    }

    #[test]
    fn test_hello_reference_encoding() {
        let codec = XmlCodec;
        let message = Message::Hello(Hello {
            mac: "5c:b9:01:f8:b6:44".to_string(),
        });
        assert_eq!(
            codec.encode(&message),
            "<Hello><Mac>5c:b9:01:f8:b6:44</Mac></Hello>"
        );
        round_trip(message);
    }

    #[test]
    fn test_offer_reference_encoding() {
        let codec = XmlCodec;
        let message = Message::Offer(Offer {
            mac: "5c:b9:01:f8:b6:40".to_string(),
            round: 6,
        });
        assert_eq!(
            codec.encode(&message),
            "<Offer round=\"6\"><Mac>5c:b9:01:f8:b6:40</Mac></Offer>"
        );
        round_trip(message);
    }

    #[test]
    fn test_request_with_and_without_threshold() {
        let codec = XmlCodec;
        let plain = Message::Request(Request {
            cast: Cast::zeroed(Die::D6, 4),
            threshold: None,
        });
        assert_eq!(codec.encode(&plain), "<Request type=\"D6\" size=\"4\"/>");
        round_trip(plain);

        let with_threshold = Message::Request(Request {
            cast: Cast::zeroed(Die::D6, 4),
            threshold: Some(3),
        });
        assert_eq!(
            codec.encode(&with_threshold),
            "<Request type=\"D6\" size=\"4\" successFrom=\"3\"/>"
        );
        round_trip(with_threshold);
    }

    #[test]
    fn test_response_with_and_without_success_count() {
        let codec = XmlCodec;
        let with_count = Message::Response(Response {
            cast: Cast::with_values(Die::D6, vec![3, 3, 3, 3]),
            success_count: Some(4),
        });
        assert_eq!(
            codec.encode(&with_count),
            "<Response type=\"D6\" size=\"4\" successCount=\"4\">\
             <Val>3</Val><Val>3</Val><Val>3</Val><Val>3</Val></Response>"
        );
        round_trip(with_count);

        round_trip(Message::Response(Response {
            cast: Cast::with_values(Die::D100, vec![17, 99]),
            success_count: None,
        }));
    }

    #[test]
    fn test_decode_tolerates_leading_whitespace() {
        let codec = XmlCodec;
        let decoded = codec
            .decode("  <Hello><Mac>aa:bb</Mac></Hello>")
            .unwrap();
        assert_eq!(
            decoded,
            Message::Hello(Hello {
                mac: "aa:bb".to_string()
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_root() {
        let codec = XmlCodec;
        assert!(matches!(
            codec.decode("<Greeting/>"),
            Err(ParseError::UnknownElement(name)) if name == "Greeting"
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = XmlCodec;
        assert!(codec.decode("").is_err());
        assert!(codec.decode("not xml at all").is_err());
        assert!(codec.decode("<Offer round=\"x\"><Mac>a</Mac></Offer>").is_err());
        assert!(codec.decode("<Request type=\"D7\" size=\"1\"/>").is_err());
    }

    #[test]
    fn test_decode_rejects_value_count_mismatch() {
        let codec = XmlCodec;
        let err = codec
            .decode("<Response type=\"D6\" size=\"3\"><Val>1</Val></Response>")
            .unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn die_strategy() -> impl Strategy<Value = Die> {
            prop::sample::select(&Die::ALL[..])
        }

        fn message_strategy() -> impl Strategy<Value = Message> {
            let hello = "[a-f0-9:]{1,20}".prop_map(|mac| Message::Hello(Hello { mac }));
            let offer = ("[a-f0-9:]{1,20}", any::<u32>())
                .prop_map(|(mac, round)| Message::Offer(Offer { mac, round }));
            let request = (die_strategy(), 0usize..16, prop::option::of(any::<u32>()))
                .prop_map(|(die, size, threshold)| {
                    Message::Request(Request {
                        cast: Cast::zeroed(die, size),
                        threshold,
                    })
                });
            let response = (
                die_strategy(),
                prop::collection::vec(any::<u32>(), 0..16),
                prop::option::of(any::<u32>()),
            )
                .prop_map(|(die, values, success_count)| {
                    Message::Response(Response {
                        cast: Cast::with_values(die, values),
                        success_count,
                    })
                });
            prop_oneof![hello, offer, request, response]
        }

        proptest! {
            #[test]
            fn round_trips_losslessly(message in message_strategy()) {
                let codec = XmlCodec;
                let text = codec.encode(&message);
                prop_assert_eq!(codec.decode(&text).unwrap(), message);
            }
        }
    }
}
