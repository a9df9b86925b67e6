//! Parse an expense message.
//!
//! The message is line-oriented: description, total amount, then one tag
//! line per participant. nom handles the individual tokens.

use std::{cmp::Ordering, num::ParseIntError};

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0, space0, space1},
    combinator::{all_consuming, map_res, opt},
    sequence::preceded,
    AsChar, IResult, InputTakeAtPosition,
};

use crate::error::InputError;
use crate::types::{Amount, ParsedExpense, ParsedTag};

/// Parse an expense submitted by the user.
///
/// The first line is the description, the second the total amount. Every
/// following line of the form `@handle` or `@handle 8.50` tags a
/// participant; other lines are ignored, so instructions pasted along
/// with the expense do no harm. Handles come back lowercased.
pub fn parse_expense_message(s: &str) -> Result<ParsedExpense, InputError> {
    let lines: Vec<_> = s.trim().lines().collect();
    if lines.len() < 2 {
        return Err(InputError::invalid_expense_format());
    }

    let description = lines[0].trim();
    if description.is_empty() {
        return Err(InputError::description_not_provided());
    }

    let amount_line = lines[1].trim();
    let amount = match all_consuming(parse_amount)(amount_line) {
        Ok((_, amount)) => amount,
        Err(_) => return Err(InputError::invalid_amount(amount_line.to_string())),
    };

    let tags = lines[2..].iter().filter_map(|line| parse_tag_line(line)).collect();

    Ok(ParsedExpense::new(description.to_string(), amount, tags))
}

fn parse_tag_line(line: &str) -> Option<ParsedTag> {
    match all_consuming(parse_tag)(line) {
        Ok((_, tag)) => Some(tag),
        Err(_) => None,
    }
}

fn parse_tag(s: &str) -> IResult<&str, ParsedTag> {
    let (s, _) = space0(s)?;
    let (s, _) = char('@')(s)?;
    let (s, handle) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(s)?;
    let (s, amount) = opt(preceded(space1, parse_amount))(s)?;
    let (s, _) = space0(s)?;
    Ok((s, ParsedTag::new(&handle.to_lowercase(), amount)))
}

fn float1(s: &str) -> IResult<&str, &str> {
    s.split_at_position1_complete(
        |item| !item.is_dec_digit() && item != ',' && item != '.' && item != '-' && item != '+',
        nom::error::ErrorKind::Float,
    )
}

/// Parse a decimal amount into minor units. Both '.' and ',' work as the
/// separator; fractional digits beyond the second are dropped.
fn parse_amount(s: &str) -> IResult<&str, Amount> {
    fn do_parse(x: &str) -> Result<Amount, ParseIntError> {
        match x.split_once([',', '.']) {
            Some((integer_part, fractional_part)) => {
                let cents = match fractional_part.len().cmp(&2) {
                    Ordering::Less => format!("{fractional_part:0<2}"),
                    Ordering::Greater => fractional_part[0..2].to_string(),
                    Ordering::Equal => fractional_part.to_string(),
                };
                format!("{integer_part}{cents}").parse::<Amount>()
            }
            None => format!("{x}00").parse::<Amount>(),
        }
    }

    preceded(multispace0, map_res(float1, do_parse))(s)
}
