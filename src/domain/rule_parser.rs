//! Rule language parser.
//!
//! Recursive descent over the rule grammar. Errors carry the byte offset and
//! the expected/found tokens.
//!
//! ```text
//! rule    := CMP(operand, operand) | BETWEEN(operand, num, num)
//!          | AND(rule, rule, ...) | OR(rule, rule, ...) | NOT(rule)
//!          | CONSECUTIVE(rule, int) | ANY_OF(rule, int)
//! CMP     := ABOVE | BELOW | EQUALS | CROSS_ABOVE | CROSS_BELOW
//! operand := number | field | MA(int) | ASK(int) | BID(int)
//!          | AVG_PRICE(int) | AVG_STRENGTH(int) | ANGLE(int)
//! ```

use crate::domain::error::ParseError;
use crate::domain::rule::{IndicatorRef, Operand, Rule};
use crate::domain::tick::BOOK_LEVELS;

const FIELDS: &[(&str, Operand)] = &[
    ("price", Operand::Price),
    ("open", Operand::Open),
    ("high", Operand::High),
    ("low", Operand::Low),
    ("change_pct", Operand::ChangePct),
    ("turnover", Operand::Turnover),
    ("strength", Operand::Strength),
    ("buy_volume", Operand::BuyVolume),
    ("sell_volume", Operand::SellVolume),
    ("return_pct", Operand::ReturnPct),
    ("hold_secs", Operand::HoldSecs),
];

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
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
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

    fn describe_next(&self) -> String {
        let word = self.peek_word();
        if !word.is_empty() {
            word.to_string()
        } else {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        }
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
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", text),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let text = &self.input[start..self.pos];
        if text.is_empty() {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }
        text.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", text),
            position: start,
        })
    }

    /// `(int)` following a function name, checked against `min..=max`.
    fn parse_int_arg(&mut self, name: &str, min: usize, max: usize) -> Result<usize, ParseError> {
        self.expect_char('(')?;
        let at = self.pos;
        let value = self.parse_integer()?;
        self.expect_char(')')?;
        if value < min || value > max {
            return Err(ParseError {
                message: format!("{} argument must be in {}..={}, got {}", name, min, max, value),
                position: at,
            });
        }
        Ok(value)
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Operand::Constant(self.parse_number()?));
        }

        let word = self.peek_word();
        if let Some((_, operand)) = FIELDS.iter().find(|(name, _)| *name == word) {
            self.pos += word.len();
            return Ok(operand.clone());
        }

        let operand = match word {
            "MA" => {
                self.pos += word.len();
                Operand::MovingAverage(self.parse_int_arg("MA", 0, usize::MAX)?)
            }
            "ASK" => {
                self.pos += word.len();
                Operand::Ask(self.parse_int_arg("ASK", 1, BOOK_LEVELS)?)
            }
            "BID" => {
                self.pos += word.len();
                Operand::Bid(self.parse_int_arg("BID", 1, BOOK_LEVELS)?)
            }
            "AVG_PRICE" => {
                self.pos += word.len();
                Operand::Indicator(IndicatorRef::AvgPrice(
                    self.parse_int_arg("AVG_PRICE", 1, usize::MAX)?,
                ))
            }
            "AVG_STRENGTH" => {
                self.pos += word.len();
                Operand::Indicator(IndicatorRef::AvgStrength(
                    self.parse_int_arg("AVG_STRENGTH", 1, usize::MAX)?,
                ))
            }
            "ANGLE" => {
                self.pos += word.len();
                Operand::Indicator(IndicatorRef::Angle(
                    self.parse_int_arg("ANGLE", 1, usize::MAX)?,
                ))
            }
            _ => {
                return Err(self.error(format!(
                    "expected operand, found '{}'",
                    self.describe_next()
                )));
            }
        };
        Ok(operand)
    }

    fn parse_comparison(&mut self, keyword: &str) -> Result<Rule, ParseError> {
        self.pos += keyword.len();
        self.expect_char('(')?;
        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;

        Ok(match keyword {
            "CROSS_ABOVE" => Rule::CrossAbove { left, right },
            "CROSS_BELOW" => Rule::CrossBelow { left, right },
            "ABOVE" => Rule::Above { left, right },
            "BELOW" => Rule::Below { left, right },
            _ => Rule::Equals { left, right },
        })
    }

    fn parse_between(&mut self) -> Result<Rule, ParseError> {
        self.pos += "BETWEEN".len();
        self.expect_char('(')?;
        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let lower = self.parse_number()?;
        self.expect_char(',')?;
        let upper = self.parse_number()?;
        self.expect_char(')')?;
        if lower > upper {
            return Err(self.error(format!(
                "BETWEEN lower bound {} exceeds upper bound {}",
                lower, upper
            )));
        }
        Ok(Rule::Between {
            operand,
            lower,
            upper,
        })
    }

    /// `KEYWORD(rule, rule, ...)` with at least two children.
    fn parse_list(&mut self, keyword: &str) -> Result<Vec<Rule>, ParseError> {
        self.pos += keyword.len();
        self.expect_char('(')?;
        let mut rules = vec![self.parse_rule()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            rules.push(self.parse_rule()?);
        }
        if rules.len() < 2 {
            return Err(self.error(format!("{} requires at least 2 rules", keyword)));
        }
        Ok(rules)
    }

    /// `KEYWORD(rule, count)` with `count >= 1`.
    fn parse_windowed(&mut self, keyword: &str) -> Result<(Box<Rule>, usize), ParseError> {
        self.pos += keyword.len();
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(',')?;
        let at = self.pos;
        let count = self.parse_integer()?;
        self.expect_char(')')?;
        if count == 0 {
            return Err(ParseError {
                message: format!("{} count must be at least 1", keyword),
                position: at,
            });
        }
        Ok((Box::new(rule), count))
    }

    fn parse_rule(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();
        let word = self.peek_word();
        match word {
            "CROSS_ABOVE" | "CROSS_BELOW" | "ABOVE" | "BELOW" | "EQUALS" => {
                self.parse_comparison(word)
            }
            "BETWEEN" => self.parse_between(),
            "AND" => Ok(Rule::And(self.parse_list("AND")?)),
            "OR" => Ok(Rule::Or(self.parse_list("OR")?)),
            "NOT" => {
                self.pos += word.len();
                self.expect_char('(')?;
                let rule = self.parse_rule()?;
                self.expect_char(')')?;
                Ok(Rule::Not(Box::new(rule)))
            }
            "CONSECUTIVE" => {
                let (rule, count) = self.parse_windowed("CONSECUTIVE")?;
                Ok(Rule::Consecutive { rule, count })
            }
            "ANY_OF" => {
                let (rule, count) = self.parse_windowed("ANY_OF")?;
                Ok(Rule::AnyOf { rule, count })
            }
            _ => Err(self.error(format!("expected rule, found '{}'", self.describe_next()))),
        }
    }

    fn parse(&mut self) -> Result<Rule, ParseError> {
        let rule = self.parse_rule()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after rule: '{}'",
                self.remaining()
            )));
        }
        Ok(rule)
    }
}

pub fn parse(input: &str) -> Result<Rule, ParseError> {
    Parser::new(input).parse()
}
