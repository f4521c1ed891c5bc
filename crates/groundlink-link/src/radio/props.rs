//! Property tables exported by the Silicon Labs WDS configurator.
//!
//! A WDS `radio_config.h` describes each property group in a comment block
//! followed by a `#define` holding the values:
//!
//! ```text
//! // Set properties:           RF_GLOBAL_XO_TUNE_2
//! // Number of properties:     2
//! // Group ID:                 0x00
//! // Start ID:                 0x00
//! // Default values:           0x40, 0x00,
//! // Descriptions:
//! //   GLOBAL_XO_TUNE - Configure the internal capacitor frequency tuning bank.
//! //   GLOBAL_CLK_CFG - Clock configuration options.
//! */
//! #define RF_GLOBAL_XO_TUNE_2 0x11, 0x00, 0x02, 0x00, 0x52, 0x00
//! ```
//!
//! Newer exports prefix the values with the full `SET_PROPERTY` header (as
//! above); older ones list only the values. Both are accepted.

use std::fmt;
use std::path::Path;

use nom::bytes::complete::{tag, tag_no_case, take_until, take_while1, take_while_m_n};
use nom::character::complete::{char, digit1, multispace0, space0, space1};
use nom::combinator::{map_res, peek, recognize};
use nom::multi::separated_list1;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use crate::error::ConfigError;

use super::command::SET_PROPERTY;

/// Number of property groups a complete configuration sets.
pub const PROPERTY_COUNT: usize = 31;

const BLOCK_MARKER: &str = "// Set properties:";

/// One `SET_PROPERTY` command's worth of configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioProperty {
    /// The `RF_*` macro name.
    pub name: String,
    pub group: u8,
    /// Number of consecutive properties set, equal to `values.len()`.
    pub count: u8,
    pub start: u8,
    pub values: Vec<u8>,
}

impl RadioProperty {
    /// The complete `SET_PROPERTY` command.
    pub fn command(&self) -> Vec<u8> {
        let mut cmd = Vec::with_capacity(4 + self.values.len());
        cmd.extend_from_slice(&[SET_PROPERTY, self.group, self.count, self.start]);
        cmd.extend_from_slice(&self.values);
        cmd
    }
}

impl fmt::Display for RadioProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for value in &self.values {
            write!(f, " {value:#04x}")?;
        }
        Ok(())
    }
}

/// Reasons a WDS header is rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("malformed property block at line {line}")]
    Malformed { line: usize },

    #[error("{name} declares {declared} properties but lists {found} values")]
    ValueCount {
        name: String,
        declared: u8,
        found: usize,
    },

    #[error("{name} has a SET_PROPERTY header that disagrees with its comment block")]
    HeaderMismatch { name: String },

    #[error("expected {expected} property blocks, found {found}")]
    BlockCount { expected: usize, found: usize },
}

/// Parse every property block in `text`.
///
/// Returns exactly [`PROPERTY_COUNT`] properties or an error.
pub fn parse(text: &str) -> Result<Vec<RadioProperty>, PropertyError> {
    let mut properties = Vec::new();
    let mut rest = text;

    while let Some(offset) = rest.find(BLOCK_MARKER) {
        let at = &rest[offset..];
        let (remaining, raw) = block(at).map_err(|_| PropertyError::Malformed {
            line: line_of(text, at),
        })?;
        properties.push(raw.into_property()?);
        rest = remaining;
    }

    if properties.len() != PROPERTY_COUNT {
        return Err(PropertyError::BlockCount {
            expected: PROPERTY_COUNT,
            found: properties.len(),
        });
    }
    Ok(properties)
}

/// Read and parse a WDS header from disk.
pub fn load(path: &Path) -> Result<Vec<RadioProperty>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text).map_err(|err| ConfigError::RadioProperties {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn line_of(text: &str, tail: &str) -> usize {
    let consumed = text.len() - tail.len();
    text[..consumed].matches('\n').count() + 1
}

struct RawBlock<'a> {
    name: &'a str,
    count: u8,
    group: u8,
    start: u8,
    values: Vec<u8>,
}

impl RawBlock<'_> {
    fn into_property(self) -> Result<RadioProperty, PropertyError> {
        let header = [SET_PROPERTY, self.group, self.count, self.start];
        let has_header = self.values.len() == header.len() + usize::from(self.count)
            && self.values.first() == Some(&SET_PROPERTY);
        let values = if has_header {
            if self.values[..header.len()] != header[..] {
                return Err(PropertyError::HeaderMismatch {
                    name: self.name.to_string(),
                });
            }
            self.values[header.len()..].to_vec()
        } else {
            self.values
        };

        if values.len() != usize::from(self.count) {
            return Err(PropertyError::ValueCount {
                name: self.name.to_string(),
                declared: self.count,
                found: values.len(),
            });
        }

        Ok(RadioProperty {
            name: self.name.to_string(),
            group: self.group,
            count: self.count,
            start: self.start,
            values,
        })
    }
}

fn block(input: &str) -> IResult<&str, RawBlock<'_>> {
    let (input, name) = preceded(pair(tag(BLOCK_MARKER), space0), macro_name)(input)?;
    let (input, count) = comment_field("// Number of properties:", decimal)(input)?;
    let (input, group) = comment_field("// Group ID:", hex_byte)(input)?;
    let (input, start) = comment_field("// Start ID:", hex_byte)(input)?;

    let (input, ()) = skip_to_define(name)(input)?;
    let (input, values) = preceded(space1, value_list)(input)?;

    Ok((
        input,
        RawBlock {
            name,
            count,
            group,
            start,
            values,
        },
    ))
}

/// Skip past `#define <name>`, passing over macros that merely start with `name`.
fn skip_to_define<'a>(name: &'a str) -> impl FnMut(&'a str) -> IResult<&'a str, ()> {
    move |mut input: &'a str| loop {
        let (rest, _) = take_until("#define")(input)?;
        let (rest, _) = tag("#define")(rest)?;
        let exact: IResult<&'a str, _> = tuple((space1, tag(name), peek(space1)))(rest);
        match exact {
            Ok((rest, _)) => return Ok((rest, ())),
            Err(_) => input = rest,
        }
    }
}

fn comment_field<'a, O>(
    label: &'static str,
    value: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    preceded(tuple((multispace0, tag(label), space0)), value)
}

fn macro_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        tag("RF_"),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn decimal(input: &str) -> IResult<&str, u8> {
    map_res(digit1, |digits: &str| digits.parse::<u8>())(input)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(
        preceded(
            tag_no_case("0x"),
            take_while_m_n(1, 2, |c: char| c.is_ascii_hexdigit()),
        ),
        |digits: &str| u8::from_str_radix(digits, 16),
    )(input)
}

fn value_list(input: &str) -> IResult<&str, Vec<u8>> {
    separated_list1(delimited(space0, char(','), multispace0), hex_byte)(input)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A WDS-style header with `blocks` property groups.
    pub(crate) fn wds_header(blocks: usize) -> String {
        let mut text = String::from("#ifndef RADIO_CONFIG_H_\n#define RADIO_CONFIG_H_\n\n");
        for i in 0..blocks {
            let group = (i / 4) as u8;
            let start = (i % 4) as u8 * 0x10;
            let values: Vec<String> = (0..3).map(|v| format!("0x{:02X}", i as u8 + v)).collect();
            text.push_str(&format!(
                "/*\n\
                 // Set properties:           RF_TEST_{i}_3\n\
                 // Number of properties:     3\n\
                 // Group ID:                 0x{group:02X}\n\
                 // Start ID:                 0x{start:02X}\n\
                 // Default values:           0x00, 0x00, 0x00,\n\
                 // Descriptions:\n\
                 //   TEST_{i} - Test property.\n\
                 */\n\
                 #define RF_TEST_{i}_3 0x11, 0x{group:02X}, 0x03, 0x{start:02X}, {}\n\n",
                values.join(", ")
            ));
        }
        text.push_str("#endif\n");
        text
    }

    fn single(body: &str) -> Result<RadioProperty, PropertyError> {
        let (_, raw) = block(body).map_err(|_| PropertyError::Malformed { line: 1 })?;
        raw.into_property()
    }

    #[test]
    fn parses_full_header() {
        let props = parse(&wds_header(PROPERTY_COUNT)).unwrap();
        assert_eq!(props.len(), PROPERTY_COUNT);
        let fifth = &props[5];
        assert_eq!(fifth.name, "RF_TEST_5_3");
        assert_eq!(fifth.group, 1);
        assert_eq!(fifth.start, 0x10);
        assert_eq!(fifth.values, vec![5, 6, 7]);
        assert_eq!(fifth.command(), vec![0x11, 1, 3, 0x10, 5, 6, 7]);
    }

    #[test]
    fn rejects_wrong_block_count() {
        assert_eq!(
            parse(&wds_header(30)),
            Err(PropertyError::BlockCount {
                expected: 31,
                found: 30
            })
        );
        assert!(matches!(
            parse(&wds_header(32)),
            Err(PropertyError::BlockCount { found: 32, .. })
        ));
        assert!(matches!(
            parse("no properties here"),
            Err(PropertyError::BlockCount { found: 0, .. })
        ));
    }

    #[test]
    fn accepts_values_without_command_header() {
        let prop = single(
            "// Set properties:   RF_PA_MODE_1\n\
             // Number of properties: 1\n\
             // Group ID: 0x22\n\
             // Start ID: 0x00\n\
             */\n\
             #define RF_PA_MODE_1 0x08\n",
        )
        .unwrap();
        assert_eq!(prop.values, vec![0x08]);
        assert_eq!(prop.command(), vec![0x11, 0x22, 0x01, 0x00, 0x08]);
    }

    #[test]
    fn values_may_wrap_lines() {
        let prop = single(
            "// Set properties: RF_SYNTH_2\n\
             // Number of properties: 2\n\
             // Group ID: 0x23\n\
             // Start ID: 0x00\n\
             #define RF_SYNTH_2 0x2C,\n    0x0E\n",
        )
        .unwrap();
        assert_eq!(prop.values, vec![0x2C, 0x0E]);
    }

    #[test]
    fn declared_count_must_match_values() {
        let err = single(
            "// Set properties: RF_SHORT_3\n\
             // Number of properties: 3\n\
             // Group ID: 0x00\n\
             // Start ID: 0x00\n\
             #define RF_SHORT_3 0x01, 0x02\n",
        )
        .unwrap_err();
        assert_eq!(
            err,
            PropertyError::ValueCount {
                name: "RF_SHORT_3".to_string(),
                declared: 3,
                found: 2
            }
        );
    }

    #[test]
    fn header_must_agree_with_comment() {
        let err = single(
            "// Set properties: RF_BAD_1\n\
             // Number of properties: 1\n\
             // Group ID: 0x10\n\
             // Start ID: 0x00\n\
             #define RF_BAD_1 0x11, 0x20, 0x01, 0x00, 0x08\n",
        )
        .unwrap_err();
        assert!(matches!(err, PropertyError::HeaderMismatch { .. }));
    }

    #[test]
    fn longer_macro_with_same_prefix_is_skipped() {
        let prop = single(
            "// Set properties: RF_MODEM_1\n\
             // Number of properties: 1\n\
             // Group ID: 0x20\n\
             // Start ID: 0x00\n\
             #define RF_MODEM_10 0x99\n\
             #define RF_MODEM_1_ALT 0x77\n\
             #define RF_MODEM_1 0x08\n",
        )
        .unwrap();
        assert_eq!(prop.name, "RF_MODEM_1");
        assert_eq!(prop.values, vec![0x08]);
    }

    #[test]
    fn malformed_block_reports_line() {
        let text = "\n\n// Set properties: RF_X_1\n// Group ID: 0x00\n";
        assert_eq!(parse(text), Err(PropertyError::Malformed { line: 3 }));
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.h");
        std::fs::write(&path, wds_header(2)).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::RadioProperties { .. }));
        assert!(err.to_string().contains("short.h"));

        let missing = load(&dir.path().join("absent.h")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn display_lists_values() {
        let prop = RadioProperty {
            name: "RF_A_2".to_string(),
            group: 0,
            count: 2,
            start: 0,
            values: vec![0x01, 0xAB],
        };
        assert_eq!(prop.to_string(), "RF_A_2: 0x01 0xab");
    }
}
