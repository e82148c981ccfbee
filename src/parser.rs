use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize},
    multi::{separated_list0, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde_json::Value;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    List { collection: String, filters: Vec<(String, String)> },
    Get { collection: String, id: i64 },
    Insert { collection: String, fields: Vec<(String, Value)> },
    Update { collection: String, id: i64, fields: Vec<(String, Value)> },
    Delete { collection: String, id: i64 },
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_ident(input: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'), String::from)(input)
}

fn parse_id(input: &str) -> IResult<&str, i64> {
    map_res(recognize(tuple((opt(char('-')), digit1))), |s: &str| s.parse::<i64>())(input)
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, num_str) = recognize(tuple((opt(char('-')), digit1, opt(tuple((char('.'), digit1))))))(input)?;
    let value = if num_str.contains('.') {
        num_str.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
    } else {
        num_str.parse::<i64>().ok().map(Value::from)
    };
    match value {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))),
    }
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(parse_quoted_string, Value::String),
        map(tag_no_case("null"), |_| Value::Null),
        map(tag_no_case("true"), |_| Value::Bool(true)),
        map(tag_no_case("false"), |_| Value::Bool(false)),
        parse_number,
    ))(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

fn parse_assignment(input: &str) -> IResult<&str, (String, Value)> {
    let (input, name) = ws(parse_ident)(input)?;
    let (input, _) = char('=')(input)?;
    let (input, value) = ws(parse_value)(input)?;
    Ok((input, (name, value)))
}

fn parse_assignments(input: &str) -> IResult<&str, Vec<(String, Value)>> {
    separated_list1(char(','), parse_assignment)(input)
}

fn parse_where_id(input: &str) -> IResult<&str, i64> {
    let (input, _) = ws(tag_ci("WHERE"))(input)?;
    let (input, _) = ws(tag_ci("ID"))(input)?;
    let (input, _) = ws(char('='))(input)?;
    parse_id(input)
}

/// Query-string form of a filter value.
fn filter_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// --- COMMAND PARSERS ---

fn parse_list(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("LIST"), tag_ci("SELECT")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = opt(tuple((tag_ci("FROM"), multispace1)))(input)?;
    let (input, collection) = parse_ident(input)?;

    let (input, filters) = opt(preceded(
        ws(tag_ci("WHERE")),
        separated_list0(ws(tag_ci("AND")), parse_assignment),
    ))(input)?;

    let filters = filters
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, filter_text(v)))
        .collect();
    Ok((input, Command::List { collection, filters }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, collection) = parse_ident(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_id(input)?;
    Ok((input, Command::Get { collection, id }))
}

fn parse_insert(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("INSERT")(input)?;
    let (input, _) = opt(ws(tag_ci("INTO")))(input)?;
    let (input, collection) = ws(parse_ident)(input)?;
    let (input, _) = ws(tag_ci("SET"))(input)?;
    let (input, fields) = parse_assignments(input)?;
    Ok((input, Command::Insert { collection, fields }))
}

fn parse_update(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("UPDATE")(input)?;
    let (input, collection) = ws(parse_ident)(input)?;
    let (input, _) = ws(tag_ci("SET"))(input)?;
    let (input, fields) = parse_assignments(input)?;
    let (input, id) = parse_where_id(input)?;
    Ok((input, Command::Update { collection, id, fields }))
}

fn parse_delete(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("DELETE")(input)?;
    let (input, _) = opt(ws(tag_ci("FROM")))(input)?;
    let (input, collection) = ws(parse_ident)(input)?;
    let (input, id) = parse_where_id(input)?;
    Ok((input, Command::Delete { collection, id }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_insert,
        parse_list,
        parse_update,
        parse_delete,
        parse_get,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.chars().count() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
