//! Condition text parser.
//!
//! One line holds one condition group; conditions inside it are separated by
//! `|` and joined by OR:
//!
//! ```text
//! group     := condition ( '|' condition )*
//! condition := indicator op target [ '@' timeframe ]
//! op        := '>' | '<' | 'between' | 'cross_above' | 'cross_below'
//! target    := number | indicator | '$' name
//! between   := indicator 'between' number [ 'and' | ',' ] number
//! ```
//!
//! Errors carry the character offset into the full line.

use crate::domain::candle::Timeframe;
use crate::domain::condition::{Comparator, Condition, ConditionGroup, Target};
use crate::domain::error::ParseError;
use crate::domain::snapshot::IndicatorKind;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.peek().is_none()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn found(&self) -> String {
        let word = self.peek_word();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word.to_string()
        }
    }

    fn peek_word(&self) -> &'a str {
        let rest = self.remaining();
        let end = rest
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        &rest[..end]
    }

    fn take_word(&mut self) -> Result<&'a str, ParseError> {
        self.skip_whitespace();
        let word = self.peek_word();
        if word.is_empty() {
            return Err(self.error(format!("expected name, found '{}'", self.found())));
        }
        self.pos += word.len();
        Ok(word)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            self.pos = start;
            return Err(self.error(format!("expected number, found '{}'", self.found())));
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn starts_number(&mut self) -> bool {
        self.skip_whitespace();
        self.peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
    }

    fn parse_comparator(&mut self) -> Result<Comparator, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('>') => {
                self.advance();
                return Ok(Comparator::GreaterThan);
            }
            Some('<') => {
                self.advance();
                return Ok(Comparator::LessThan);
            }
            _ => {}
        }

        let start = self.pos;
        let word = self.peek_word();
        let comparator = match word.to_ascii_lowercase().as_str() {
            "between" => Comparator::Between,
            "cross_above" | "crosses_above" => Comparator::CrossAbove,
            "cross_below" | "crosses_below" => Comparator::CrossBelow,
            "gt" | "above" => Comparator::GreaterThan,
            "lt" | "below" => Comparator::LessThan,
            _ => {
                return Err(ParseError {
                    message: format!(
                        "expected comparator (>, <, between, cross_above, cross_below), found '{}'",
                        self.found()
                    ),
                    position: start,
                });
            }
        };
        self.pos += word.len();
        Ok(comparator)
    }

    fn parse_target(&mut self) -> Result<Target, ParseError> {
        self.skip_whitespace();

        if self.peek() == Some('$') {
            self.advance();
            let name_pos = self.pos;
            let name = self.peek_word();
            if name.is_empty() {
                return Err(ParseError {
                    message: "expected parameter name after '$'".to_string(),
                    position: name_pos,
                });
            }
            self.pos += name.len();
            return Ok(Target::Parameter(name.to_string()));
        }

        if self.starts_number() {
            return Ok(Target::Constant(self.parse_number()?));
        }

        let word = self.take_word()?;
        Ok(Target::Indicator(IndicatorKind::from_name(word)))
    }

    fn parse_range(&mut self) -> Result<Target, ParseError> {
        let lower = self.parse_number()?;
        self.skip_whitespace();
        if self.peek() == Some(',') {
            self.advance();
        } else if self.peek_word().eq_ignore_ascii_case("and") {
            self.pos += 3;
        }
        let upper_pos = {
            self.skip_whitespace();
            self.pos
        };
        let upper = self.parse_number()?;
        if upper < lower {
            return Err(ParseError {
                message: format!("between bounds out of order: {} > {}", lower, upper),
                position: upper_pos,
            });
        }
        Ok(Target::Range { lower, upper })
    }

    fn parse_timeframe(&mut self) -> Result<Option<Timeframe>, ParseError> {
        self.skip_whitespace();
        if self.peek() != Some('@') {
            return Ok(None);
        }
        self.advance();
        let start = self.pos;
        let word = self.peek_word();
        let timeframe = word.parse::<Timeframe>().map_err(|message| ParseError {
            message,
            position: start,
        })?;
        self.pos += word.len();
        Ok(Some(timeframe))
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let indicator = IndicatorKind::from_name(self.take_word()?);
        let comparator = self.parse_comparator()?;
        let target = if comparator == Comparator::Between {
            self.parse_range()?
        } else {
            self.parse_target()?
        };
        let timeframe = self.parse_timeframe()?;
        Ok(Condition {
            indicator,
            comparator,
            target,
            timeframe,
        })
    }

    fn parse_group(&mut self) -> Result<ConditionGroup, ParseError> {
        if self.at_end() {
            return Err(self.error("empty condition group"));
        }

        let mut conditions = vec![self.parse_condition()?];
        loop {
            if self.at_end() {
                break;
            }
            match self.peek() {
                Some('|') => {
                    self.advance();
                    conditions.push(self.parse_condition()?);
                }
                _ => {
                    return Err(self.error(format!(
                        "expected '|' or end of input, found '{}'",
                        self.found()
                    )));
                }
            }
        }
        Ok(ConditionGroup { conditions })
    }
}

/// Parse a single condition, e.g. `rsi < 30` or `close > sma_long @weekly`.
pub fn parse_condition(input: &str) -> Result<Condition, ParseError> {
    let mut parser = Parser::new(input);
    let condition = parser.parse_condition()?;
    if !parser.at_end() {
        return Err(parser.error(format!(
            "unexpected trailing input '{}'",
            parser.found()
        )));
    }
    Ok(condition)
}

/// Parse one OR-group of conditions separated by `|`.
pub fn parse_group(input: &str) -> Result<ConditionGroup, ParseError> {
    Parser::new(input).parse_group()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_less_than_constant() {
        let c = parse_condition("rsi < 30").unwrap();
        assert_eq!(c.indicator, IndicatorKind::Rsi);
        assert_eq!(c.comparator, Comparator::LessThan);
        assert_eq!(c.target, Target::Constant(30.0));
        assert_eq!(c.timeframe, None);
    }

    #[test]
    fn parse_indicator_target_with_timeframe() {
        let c = parse_condition("sma_short cross_above sma_medium @weekly").unwrap();
        assert_eq!(c.comparator, Comparator::CrossAbove);
        assert_eq!(c.target, Target::Indicator(IndicatorKind::SmaMedium));
        assert_eq!(c.timeframe, Some(Timeframe::Weekly));
    }

    #[test]
    fn parse_between_forms() {
        for text in ["stoch_k between 20 80", "stoch_k between 20, 80", "stoch_k BETWEEN 20 and 80"] {
            let c = parse_condition(text).unwrap();
            assert_eq!(
                c.target,
                Target::Range {
                    lower: 20.0,
                    upper: 80.0
                },
                "{}",
                text
            );
        }
    }

    #[test]
    fn parse_between_rejects_reversed_bounds() {
        let err = parse_condition("rsi between 80 20").unwrap_err();
        assert!(err.message.contains("out of order"));
        assert_eq!(err.position, 15);
    }

    #[test]
    fn parse_parameter_target() {
        let c = parse_condition("rsi < $rsi_entry").unwrap();
        assert_eq!(c.target, Target::Parameter("rsi_entry".into()));
    }

    #[test]
    fn parse_negative_constant() {
        let c = parse_condition("macd_histogram > -0.5").unwrap();
        assert_eq!(c.target, Target::Constant(-0.5));
    }

    #[test]
    fn unknown_indicator_parses_as_unknown() {
        let c = parse_condition("ichimoku > 3").unwrap();
        assert_eq!(c.indicator, IndicatorKind::Unknown("ichimoku".into()));
    }

    #[test]
    fn parse_group_with_alternatives() {
        let group = parse_group("rsi < 30 | stoch_k < 20 @daily").unwrap();
        assert_eq!(group.conditions.len(), 2);
        assert_eq!(group.conditions[1].timeframe, Some(Timeframe::Daily));
    }

    #[test]
    fn bad_comparator_position() {
        let err = parse_condition("rsi ? 30").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.message.contains("expected comparator"));
    }

    #[test]
    fn bad_timeframe_position() {
        let err = parse_condition("rsi < 30 @hourly").unwrap_err();
        assert_eq!(err.position, 10);
    }

    #[test]
    fn missing_target() {
        let err = parse_condition("rsi <").unwrap_err();
        assert_eq!(err.position, 5);
    }

    #[test]
    fn empty_group_is_error() {
        assert!(parse_group("   ").is_err());
    }

    #[test]
    fn trailing_garbage_in_group() {
        let err = parse_group("rsi < 30 close").unwrap_err();
        assert_eq!(err.position, 9);
    }

    #[test]
    fn display_output_parses_back() {
        let text = "close cross_below ema_slow @monthly";
        let c = parse_condition(text).unwrap();
        assert_eq!(parse_condition(&c.to_string()).unwrap(), c);
    }
}
