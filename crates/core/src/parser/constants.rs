use super::Parser;
use crate::error::{VfrError, VfrResult};
use crate::lexer::Token;
use crate::opcode::{ConstValue, FormId, Guid, HiiDate, HiiRef, HiiTime, QuestionId, StringId};

/// Decode a numeric lexeme; overflow and bad digits are literal errors.
pub(super) fn decode_number(lexeme: &str, line: u32) -> VfrResult<u64> {
    let parsed = match lexeme
        .strip_prefix("0x")
        .or_else(|| lexeme.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => lexeme.parse::<u64>(),
    };
    parsed.map_err(|_| VfrError::malformed(line, format!("numeric literal '{}' out of range", lexeme)))
}

/// Mask a value to `width` bytes (two's complement for negatives).
pub(super) fn mask_to_width(value: u64, width: u8) -> u64 {
    match width {
        1 => value & 0xff,
        2 => value & 0xffff,
        4 => value & 0xffff_ffff,
        _ => value,
    }
}

impl<'a> Parser<'a> {
    // -- Numbers ------------------------------------------------

    pub(super) fn take_number(&mut self) -> VfrResult<u64> {
        match self.peek() {
            Token::Number(lexeme) => {
                let line = self.line();
                let n = decode_number(lexeme, line)?;
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("number")),
        }
    }

    fn take_bounded(&mut self, max: u64, what: &str) -> VfrResult<u64> {
        let line = self.line();
        let n = self.take_number()?;
        if n > max {
            return Err(VfrError::malformed(
                line,
                format!("{} value {:#x} exceeds {:#x}", what, n, max),
            ));
        }
        Ok(n)
    }

    pub(super) fn take_u8(&mut self, what: &str) -> VfrResult<u8> {
        self.take_bounded(u64::from(u8::MAX), what).map(|n| n as u8)
    }

    pub(super) fn take_u16(&mut self, what: &str) -> VfrResult<u16> {
        self.take_bounded(u64::from(u16::MAX), what).map(|n| n as u16)
    }

    pub(super) fn take_u32(&mut self, what: &str) -> VfrResult<u32> {
        self.take_bounded(u64::from(u32::MAX), what).map(|n| n as u32)
    }

    /// `[-] N`, negatives in two's complement.
    pub(super) fn take_signed(&mut self) -> VfrResult<u64> {
        if self.eat(&Token::Minus) {
            Ok(self.take_number()?.wrapping_neg())
        } else {
            self.take_number()
        }
    }

    // -- Tokens -------------------------------------------------

    /// `STRING_TOKEN ( N )`
    pub(super) fn parse_string_token(&mut self) -> VfrResult<StringId> {
        self.expect_word("STRING_TOKEN")?;
        self.expect(&Token::LParen)?;
        let id = self.take_u16("string id")?;
        self.expect(&Token::RParen)?;
        Ok(StringId(id))
    }

    /// `IMAGE_TOKEN ( N )`
    pub(super) fn parse_image_token(&mut self) -> VfrResult<u16> {
        self.expect_word("IMAGE_TOKEN")?;
        self.expect(&Token::LParen)?;
        let id = self.take_u16("image id")?;
        self.expect(&Token::RParen)?;
        Ok(id)
    }

    /// Eleven-field GUID literal, flat or with the trailing eight bytes in
    /// their own brace group.
    pub(super) fn parse_guid(&mut self) -> VfrResult<Guid> {
        let line = self.expect(&Token::LBrace)?;
        let data1 = self.take_u32("GUID field")?;
        self.expect(&Token::Comma)?;
        let data2 = self.take_u16("GUID field")?;
        self.expect(&Token::Comma)?;
        let data3 = self.take_u16("GUID field")?;
        self.expect(&Token::Comma)?;

        let grouped = self.eat(&Token::LBrace);
        let mut bytes = Vec::with_capacity(8);
        loop {
            bytes.push(self.take_u8("GUID byte")?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if grouped {
            self.expect(&Token::RBrace)?;
        }
        self.expect(&Token::RBrace)?;
        let data4: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            VfrError::malformed(line, format!("GUID needs 8 trailing bytes, got {}", bytes.len()))
        })?;
        Ok(Guid {
            data1,
            data2,
            data3,
            data4,
        })
    }

    // -- Constant values ----------------------------------------

    /// A value literal in `default = ...` or `option ... value = ...`.
    pub(super) fn parse_const_value(&mut self) -> VfrResult<ConstValue> {
        match self.peek() {
            Token::Word(w) if w == "TRUE" || w == "true" => {
                self.advance();
                Ok(ConstValue::Bool(true))
            }
            Token::Word(w) if w == "FALSE" || w == "false" => {
                self.advance();
                Ok(ConstValue::Bool(false))
            }
            Token::Word(w) if w == "STRING_TOKEN" => Ok(ConstValue::String(self.parse_string_token()?)),
            Token::LBrace => {
                self.advance();
                let mut values = Vec::new();
                loop {
                    values.push(self.take_signed()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(ConstValue::Buffer(values))
            }
            Token::Minus => Ok(ConstValue::Number(self.take_signed()?)),
            Token::Number(_) => self.parse_numeric_const(),
            _ => Err(self.unexpected("constant value")),
        }
    }

    /// A number, or a date `Y/M/D`, time `H:M:S` or reference `Q;F;G;S`
    /// starting with one.
    fn parse_numeric_const(&mut self) -> VfrResult<ConstValue> {
        let line = self.line();
        if matches!(self.cursor.peek_nth(1), Token::Slash) {
            let year = self.take_u16("year")?;
            self.expect(&Token::Slash)?;
            let month = self.take_u8("month")?;
            self.expect(&Token::Slash)?;
            let day = self.take_u8("day")?;
            if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
                return Err(VfrError::malformed(
                    line,
                    format!("invalid date {}/{}/{}", year, month, day),
                ));
            }
            return Ok(ConstValue::Date(HiiDate { year, month, day }));
        }
        if matches!(self.cursor.peek_nth(1), Token::Colon) {
            let hour = self.take_u8("hour")?;
            self.expect(&Token::Colon)?;
            let minute = self.take_u8("minute")?;
            self.expect(&Token::Colon)?;
            let second = self.take_u8("second")?;
            if hour > 23 || minute > 59 || second > 59 {
                return Err(VfrError::malformed(
                    line,
                    format!("invalid time {}:{}:{}", hour, minute, second),
                ));
            }
            return Ok(ConstValue::Time(HiiTime {
                hour,
                minute,
                second,
            }));
        }
        if matches!(self.cursor.peek_nth(1), Token::Semicolon) {
            if let Some(r) = self.speculate(Self::parse_ref_const) {
                return Ok(ConstValue::Ref(r));
            }
        }
        Ok(ConstValue::Number(self.take_number()?))
    }

    /// `Q ; F ; G ; STRING_TOKEN(S)`
    fn parse_ref_const(&mut self) -> VfrResult<HiiRef> {
        let question_id = QuestionId(self.take_u16("question id")?);
        self.expect(&Token::Semicolon)?;
        let form_id = FormId(self.take_u16("form id")?);
        self.expect(&Token::Semicolon)?;
        let formset_guid = self.parse_guid()?;
        self.expect(&Token::Semicolon)?;
        let device_path = self.parse_string_token()?;
        Ok(HiiRef {
            question_id,
            form_id,
            formset_guid,
            device_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::lexer::lex;

    fn with_parser<T>(src: &str, f: impl FnOnce(&mut Parser) -> T) -> T {
        let tokens = lex(src).unwrap();
        let mut p = Parser::new(&tokens, &ParserConfig::default());
        f(&mut p)
    }

    #[test]
    fn flat_and_grouped_guids_agree() {
        let flat = with_parser("{0x12345678, 0x1234, 0x5678, 1, 2, 3, 4, 5, 6, 7, 8}", |p| {
            p.parse_guid().unwrap()
        });
        let grouped = with_parser(
            "{0x12345678, 0x1234, 0x5678, {1, 2, 3, 4, 5, 6, 7, 8}}",
            |p| p.parse_guid().unwrap(),
        );
        assert_eq!(flat, grouped);
        assert_eq!(flat.to_string(), "12345678-1234-5678-0102-030405060708");
    }

    #[test]
    fn guid_field_overflow_is_malformed() {
        let err = with_parser("{0x1, 0x12345, 0x1, {1, 2, 3, 4, 5, 6, 7, 8}}", |p| {
            p.parse_guid().unwrap_err()
        });
        assert!(matches!(err, VfrError::MalformedLiteral { .. }));
        let short = with_parser("{0x1, 0x1, 0x1, {1, 2, 3}}", |p| p.parse_guid().unwrap_err());
        assert!(matches!(short, VfrError::MalformedLiteral { .. }));
    }

    #[test]
    fn date_time_and_ref_constants() {
        assert_eq!(
            with_parser("2024/2/29", |p| p.parse_const_value().unwrap()),
            ConstValue::Date(HiiDate {
                year: 2024,
                month: 2,
                day: 29
            })
        );
        assert_eq!(
            with_parser("23:59:1", |p| p.parse_const_value().unwrap()),
            ConstValue::Time(HiiTime {
                hour: 23,
                minute: 59,
                second: 1
            })
        );
        let r = with_parser(
            "3;4;{0x1,0x2,0x3,{0,0,0,0,0,0,0,1}};STRING_TOKEN(7)",
            |p| p.parse_const_value().unwrap(),
        );
        assert!(matches!(r, ConstValue::Ref(HiiRef { form_id: FormId(4), .. })));
    }

    #[test]
    fn number_before_a_statement_end_is_not_a_ref() {
        with_parser("5; endoneof", |p| {
            assert_eq!(p.parse_const_value().unwrap(), ConstValue::Number(5));
            assert!(p.is(&Token::Semicolon));
        });
    }

    #[test]
    fn negative_values_wrap_and_mask() {
        let v = with_parser("-1", |p| p.take_signed().unwrap());
        assert_eq!(mask_to_width(v, 2), 0xffff);
        assert!(matches!(
            decode_number("0x10000000000000000", 1),
            Err(VfrError::MalformedLiteral { .. })
        ));
        assert!(decode_number("99999999999999999999999", 1).is_err());
    }

    #[test]
    fn buffer_constant() {
        assert_eq!(
            with_parser("{1, 2, 3}", |p| p.parse_const_value().unwrap()),
            ConstValue::Buffer(vec![1, 2, 3])
        );
    }
}
