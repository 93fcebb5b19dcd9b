use chrono::NaiveDate;
use thiserror::Error;

use crate::promo::PromoDraft;
use crate::types::OrderStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    InitAdmin,
    CreatePromo { code: String, discount: f64, max_uses: Option<i32>, expires_at: Option<NaiveDate> },
    AddCourierRole(i64),
    Help,
    CourierOrders,
    Transition { order_id: i64, to: OrderStatus },
}

impl Command {
    pub fn promo_draft(&self) -> Option<PromoDraft> {
        match self {
            Command::CreatePromo { code, discount, max_uses, expires_at } => Some(PromoDraft {
                code: code.clone(),
                discount: *discount,
                max_uses: *max_uses,
                expires_at: *expires_at,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not a command")]
    NotACommand,
    #[error("unknown command /{0}")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

const CREATE_PROMO_USAGE: &str = "/createpromo <code> <discount%> [max_uses] [expires_at YYYY-MM-DD]";
const ADD_COURIER_USAGE: &str = "/add_courier_role <telegram_id>";

fn transition_usage(name: &str) -> &'static str {
    match name {
        "accept_order" => "/accept_order [id]",
        "start_cooking" => "/start_cooking [id]",
        "start_delivery" => "/start_delivery [id]",
        _ => "/complete_order [id]",
    }
}

fn transition_target(name: &str) -> Option<OrderStatus> {
    match name {
        "accept_order" => Some(OrderStatus::Accepted),
        "start_cooking" => Some(OrderStatus::Cooking),
        "start_delivery" => Some(OrderStatus::OnDelivery),
        "complete_order" => Some(OrderStatus::Delivered),
        _ => None,
    }
}

/// Parses a chat message into a command. `/cmd@botname` is accepted as `/cmd`.
pub fn parse(text: &str) -> Result<Command, ParseError> {
    let mut words = text.split_whitespace();
    let head = words.next().and_then(|word| word.strip_prefix('/')).ok_or(ParseError::NotACommand)?;
    let name = head.split('@').next().unwrap_or(head);
    let args: Vec<&str> = words.collect();

    if let Some(to) = transition_target(name) {
        let order_id = match args.as_slice() {
            [id] => id.parse().map_err(|_| ParseError::Usage(transition_usage(name)))?,
            _ => return Err(ParseError::Usage(transition_usage(name))),
        };
        return Ok(Command::Transition { order_id, to });
    }

    match name {
        "start" => Ok(Command::Start),
        "init_admin" => Ok(Command::InitAdmin),
        "help" => Ok(Command::Help),
        "courier_orders" => Ok(Command::CourierOrders),
        "add_courier_role" => match args.as_slice() {
            [id] => id.parse().map(Command::AddCourierRole).map_err(|_| ParseError::Usage(ADD_COURIER_USAGE)),
            _ => Err(ParseError::Usage(ADD_COURIER_USAGE)),
        },
        "createpromo" => parse_create_promo(&args),
        other => Err(ParseError::Unknown(other.to_owned())),
    }
}

fn parse_create_promo(args: &[&str]) -> Result<Command, ParseError> {
    let usage = ParseError::Usage(CREATE_PROMO_USAGE);
    let (code, discount, rest) = match args {
        [code, discount, rest @ ..] if rest.len() <= 2 => (*code, *discount, rest),
        _ => return Err(usage),
    };

    let discount = discount.trim_end_matches('%').parse::<f64>().map_err(|_| usage.clone())?;
    let max_uses = rest
        .first()
        .map(|raw| raw.parse::<i32>())
        .transpose()
        .map_err(|_| usage.clone())?;
    let expires_at = rest
        .get(1)
        .map(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .transpose()
        .map_err(|_| usage)?;

    Ok(Command::CreatePromo { code: code.to_owned(), discount, max_uses, expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_addressed_commands() {
        assert_eq!(parse("/start"), Ok(Command::Start));
        assert_eq!(parse("/courier_orders@tavola_bot"), Ok(Command::CourierOrders));
        assert_eq!(
            parse("  /accept_order   42 "),
            Ok(Command::Transition { order_id: 42, to: OrderStatus::Accepted })
        );
        assert_eq!(
            parse("/complete_order 7"),
            Ok(Command::Transition { order_id: 7, to: OrderStatus::Delivered })
        );
        assert_eq!(parse("/add_courier_role 555"), Ok(Command::AddCourierRole(555)));
    }

    #[test]
    fn bad_arguments_report_usage() {
        assert_eq!(parse("/start_delivery"), Err(ParseError::Usage("/start_delivery [id]")));
        assert_eq!(parse("/start_cooking abc"), Err(ParseError::Usage("/start_cooking [id]")));
        assert_eq!(parse("/add_courier_role"), Err(ParseError::Usage(ADD_COURIER_USAGE)));
        assert_eq!(parse("/createpromo ONLYCODE"), Err(ParseError::Usage(CREATE_PROMO_USAGE)));
        assert_eq!(parse("/createpromo X 10 1 2025-13-01"), Err(ParseError::Usage(CREATE_PROMO_USAGE)));
    }

    #[test]
    fn create_promo_arguments() {
        let cmd = parse("/createpromo spring 15% 3 2030-05-01").unwrap();
        let draft = cmd.promo_draft().unwrap();
        assert_eq!(draft.code, "spring");
        assert_eq!(draft.discount, 15.0);
        assert_eq!(draft.max_uses, Some(3));
        assert_eq!(draft.expires_at, NaiveDate::from_ymd_opt(2030, 5, 1));

        let cmd = parse("/createpromo autumn 5").unwrap();
        assert_eq!(cmd.promo_draft().unwrap().max_uses, None);
    }

    #[test]
    fn free_text_is_not_a_command() {
        assert_eq!(parse("hello"), Err(ParseError::NotACommand));
        assert_eq!(parse(""), Err(ParseError::NotACommand));
        assert_eq!(parse("/dance"), Err(ParseError::Unknown("dance".into())));
    }
}
