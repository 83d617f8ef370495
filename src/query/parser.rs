//! Query Parser
//!
//! Parses query strings into a [`QueryAst`].
//!
//! # Supported Syntax
//!
//! ```text
//! find <tag|*>
//! [where <condition> [and|or <condition> ...]]
//! [order by [-]field [asc|desc]]
//! [limit n] [offset n]
//! [select field, ... | select *]
//! ```
//!
//! Conditions are `field op value`, `field exists`, `field is empty` or
//! `field is not empty`, optionally prefixed with `not` and grouped with
//! parentheses. `and` binds tighter than `or`. Operators are
//! `= != > < >= <= ~`. Field names and values containing spaces must be
//! quoted.
//!
//! # Examples
//!
//! ```text
//! find task where Status = Done
//! find task where created > 7d and (Priority = High or Priority = Urgent)
//! find * where name ~ "weekly review" order by -updated limit 20
//! find meeting where parent.tags = project select Attendees, Date
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};

/// Parse a query string into a Query AST
pub fn parse_query(input: &str) -> QueryResult<QueryAst> {
    let input = input.trim();

    match parse_full_query(input) {
        Ok((remaining, query)) => {
            if remaining.trim().is_empty() {
                Ok(query)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after query: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::Parse(format!(
            "Unexpected input at: '{}'",
            e.input.chars().take(40).collect::<String>()
        ))),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse("Incomplete query".to_string())),
    }
}

/// Parse the full query
fn parse_full_query(input: &str) -> IResult<&str, QueryAst> {
    let (input, _) = multispace0(input)?;
    let (input, _) = keyword("find")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, find) = parse_target(input)?;
    let (input, where_clause) = opt(preceded(
        tuple((multispace1, keyword("where"), multispace0)),
        parse_or_expr,
    ))(input)?;
    let (input, order_by) = opt(preceded(multispace1, parse_order_clause))(input)?;
    let (input, limit) = opt(preceded(multispace1, |i| parse_count_clause("limit", i)))(input)?;
    let (input, offset) = opt(preceded(multispace1, |i| parse_count_clause("offset", i)))(input)?;
    let (input, select) = opt(preceded(multispace1, parse_select_clause))(input)?;
    let (input, _) = multispace0(input)?;

    Ok((
        input,
        QueryAst {
            find,
            where_: where_clause.map(top_level_entries).unwrap_or_default(),
            order_by,
            select,
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            offset: offset.unwrap_or(0),
        },
    ))
}

/// A top-level AND chain becomes separate where entries
fn top_level_entries(entry: WhereEntry) -> Vec<WhereEntry> {
    match entry {
        WhereEntry::Group(group) if group.kind == GroupType::And && !group.negated => {
            group.clauses
        }
        other => vec![other],
    }
}

/// Parse the `find` target: `*`, a quoted name or a bare name
fn parse_target(input: &str) -> IResult<&str, String> {
    alt((
        map(tag("*"), |s: &str| s.to_string()),
        parse_quoted_string,
        map(parse_identifier, str::to_string),
    ))(input)
}

/// Parse an OR chain of AND chains
fn parse_or_expr(input: &str) -> IResult<&str, WhereEntry> {
    let (input, first) = parse_and_expr(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace1, keyword("or"), multispace0)),
        parse_and_expr,
    ))(input)?;
    Ok((input, fold_group(first, rest, GroupType::Or)))
}

/// Parse an AND chain of unary conditions
fn parse_and_expr(input: &str) -> IResult<&str, WhereEntry> {
    let (input, first) = parse_unary(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace1, keyword("and"), multispace0)),
        parse_unary,
    ))(input)?;
    Ok((input, fold_group(first, rest, GroupType::And)))
}

fn fold_group(first: WhereEntry, rest: Vec<WhereEntry>, kind: GroupType) -> WhereEntry {
    if rest.is_empty() {
        return first;
    }
    let mut clauses = Vec::with_capacity(rest.len() + 1);
    clauses.push(first);
    clauses.extend(rest);
    WhereEntry::Group(WhereGroup {
        kind,
        clauses,
        negated: false,
    })
}

/// Parse `not <unary>`, a parenthesized expression, or a condition
fn parse_unary(input: &str) -> IResult<&str, WhereEntry> {
    alt((
        map(
            preceded(pair(keyword("not"), multispace0), parse_unary),
            negate_entry,
        ),
        delimited(
            pair(char('('), multispace0),
            parse_or_expr,
            pair(multispace0, char(')')),
        ),
        parse_condition,
    ))(input)
}

fn negate_entry(entry: WhereEntry) -> WhereEntry {
    match entry {
        WhereEntry::Clause(clause) => WhereEntry::Clause(clause.negate()),
        WhereEntry::Group(group) => WhereEntry::Group(group.negate()),
    }
}

/// Parse a single condition like `Status = Done` or `Priority is empty`
fn parse_condition(input: &str) -> IResult<&str, WhereEntry> {
    let (input, field) = parse_field(input)?;
    let (input, (operator, value)) = alt((
        parse_existence_test,
        map(
            tuple((multispace0, parse_operator, multispace0, parse_value)),
            |(_, op, _, v)| (op, v),
        ),
    ))(input)?;

    Ok((
        input,
        WhereEntry::Clause(WhereClause {
            field,
            operator,
            value,
            negated: false,
        }),
    ))
}

/// Parse ` exists`, ` is empty`, ` is not empty`
fn parse_existence_test(input: &str) -> IResult<&str, (Operator, QueryValue)> {
    let (input, _) = multispace1(input)?;
    alt((
        value((Operator::Exists, QueryValue::Bool(true)), keyword("exists")),
        value(
            (Operator::Exists, QueryValue::Bool(true)),
            tuple((
                keyword("is"),
                multispace1,
                keyword("not"),
                multispace1,
                keyword("empty"),
            )),
        ),
        value(
            (Operator::IsEmpty, QueryValue::Bool(true)),
            tuple((keyword("is"), multispace1, keyword("empty"))),
        ),
    ))(input)
}

/// Parse comparison operator
fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, alt((tag("!="), tag("<>")))),
        value(Operator::Eq, alt((tag("=="), tag("=")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
        value(Operator::Contains, tag("~")),
    ))(input)
}

/// Parse a value: quoted text, or a bare token classified as number or text
fn parse_value(input: &str) -> IResult<&str, QueryValue> {
    alt((
        map(parse_quoted_string, QueryValue::Text),
        map(
            take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')'),
            classify_token,
        ),
    ))(input)
}

fn classify_token(token: &str) -> QueryValue {
    if let Ok(i) = token.parse::<i64>() {
        return QueryValue::Integer(i);
    }
    let numeric_chars = token
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-');
    if numeric_chars {
        if let Ok(f) = token.parse::<f64>() {
            return QueryValue::Float(f);
        }
    }
    QueryValue::Text(token.to_string())
}

/// Parse ORDER BY clause
fn parse_order_clause(input: &str) -> IResult<&str, OrderBy> {
    let (input, _) = keyword("order")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = keyword("by")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, dash) = opt(char('-'))(input)?;
    let (input, field) = parse_field(input)?;
    let (input, direction) = opt(preceded(
        multispace1,
        alt((value(true, keyword("desc")), value(false, keyword("asc")))),
    ))(input)?;

    let desc = direction.unwrap_or(dash.is_some());
    Ok((input, OrderBy { field, desc }))
}

/// Parse `limit n` / `offset n`
fn parse_count_clause<'a>(name: &'static str, input: &'a str) -> IResult<&'a str, i64> {
    let (input, _) = keyword(name)(input)?;
    let (input, _) = multispace1(input)?;
    map_res(digit1, |s: &str| s.parse::<i64>())(input)
}

/// Parse SELECT clause
fn parse_select_clause(input: &str) -> IResult<&str, Vec<String>> {
    let (input, _) = keyword("select")(input)?;
    let (input, _) = multispace1(input)?;

    alt((
        map(char('*'), |_| vec!["*".to_string()]),
        separated_list1(delimited(multispace0, char(','), multispace0), parse_field),
    ))(input)
}

/// Parse a field name, quoted or bare (`Status`, `parent.tags`)
fn parse_field(input: &str) -> IResult<&str, String> {
    alt((parse_quoted_string, map(parse_identifier, str::to_string)))(input)
}

/// Parse identifier (tag, field name)
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == '-'),
    ))(input)
}

/// Parse single- or double-quoted string
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            |s: &str| s.to_string(),
        ),
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| s.to_string(),
        ),
    ))(input)
}

/// Case-insensitive keyword that is not the prefix of a longer word
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_word_char)))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(entry: &WhereEntry) -> &WhereClause {
        match entry {
            WhereEntry::Clause(c) => c,
            other => panic!("expected clause, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_find() {
        let query = parse_query("find task").unwrap();
        assert_eq!(query.find, "task");
        assert!(query.where_.is_empty());
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.offset, 0);
        assert!(query.order_by.is_none());
    }

    #[test]
    fn test_parse_find_all_and_quoted_tag() {
        assert_eq!(parse_query("find *").unwrap().find, "*");
        assert_eq!(parse_query("find \"meeting notes\"").unwrap().find, "meeting notes");
    }

    #[test]
    fn test_parse_where_equality() {
        let query = parse_query("find task where Status = Done").unwrap();
        assert_eq!(query.where_.len(), 1);
        assert_eq!(clause(&query.where_[0]), &WhereClause::eq("Status", "Done"));
    }

    #[test]
    fn test_parse_and_chain_is_flattened() {
        let query =
            parse_query("find task where Status = Done and created > 7d and Points >= 3").unwrap();
        assert_eq!(query.where_.len(), 3);
        assert_eq!(
            clause(&query.where_[1]),
            &WhereClause::new("created", Operator::Gt, "7d")
        );
        assert_eq!(
            clause(&query.where_[2]),
            &WhereClause::new("Points", Operator::Gte, 3i64)
        );
    }

    #[test]
    fn test_parse_or_binds_looser_than_and() {
        let query =
            parse_query("find task where Status = Done or Status = Active and Priority = High")
                .unwrap();
        assert_eq!(query.where_.len(), 1);
        match &query.where_[0] {
            WhereEntry::Group(g) => {
                assert_eq!(g.kind, GroupType::Or);
                assert_eq!(g.clauses.len(), 2);
                assert!(matches!(g.clauses[1], WhereEntry::Group(ref inner) if inner.kind == GroupType::And));
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_parentheses_and_not() {
        let query = parse_query(
            "find task where created > 2024-01-01 and not (Priority = Low or Priority = Medium)",
        )
        .unwrap();
        assert_eq!(query.where_.len(), 2);
        match &query.where_[1] {
            WhereEntry::Group(g) => {
                assert!(g.negated);
                assert_eq!(g.kind, GroupType::Or);
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_existence_tests() {
        let query = parse_query(
            "find task where Priority is empty and Owner exists and Due is not empty",
        )
        .unwrap();
        assert_eq!(clause(&query.where_[0]).operator, Operator::IsEmpty);
        assert_eq!(clause(&query.where_[1]).operator, Operator::Exists);
        assert_eq!(clause(&query.where_[2]).operator, Operator::Exists);
    }

    #[test]
    fn test_parse_contains_with_quoted_value() {
        let query = parse_query("find * where name ~ \"weekly review\"").unwrap();
        assert_eq!(
            clause(&query.where_[0]),
            &WhereClause::contains("name", "weekly review")
        );
    }

    #[test]
    fn test_parse_quoted_field_and_parent_field() {
        let query =
            parse_query("find meeting where 'Due Date' < today and parent.tags = project").unwrap();
        assert_eq!(clause(&query.where_[0]).field, "Due Date");
        assert_eq!(clause(&query.where_[1]).field, "parent.tags");
    }

    #[test]
    fn test_parse_order_limit_offset_select() {
        let query = parse_query(
            "find task where Status = Done order by -updated limit 20 offset 40 select Status, Priority",
        )
        .unwrap();
        assert_eq!(query.order_by, Some(OrderBy::desc("updated")));
        assert_eq!(query.limit, 20);
        assert_eq!(query.offset, 40);
        assert_eq!(
            query.select,
            Some(vec!["Status".to_string(), "Priority".to_string()])
        );
    }

    #[test]
    fn test_parse_order_direction_keyword() {
        let query = parse_query("find task order by name desc").unwrap();
        assert_eq!(query.order_by, Some(OrderBy::desc("name")));

        let query = parse_query("find task order by created asc select *").unwrap();
        assert_eq!(query.order_by, Some(OrderBy::asc("created")));
        assert_eq!(query.select, Some(vec!["*".to_string()]));
    }

    #[test]
    fn test_value_ending_before_order_keyword() {
        let query = parse_query("find task where Status = Done order by name").unwrap();
        assert_eq!(clause(&query.where_[0]).value, QueryValue::from("Done"));
        assert_eq!(query.order_by, Some(OrderBy::asc("name")));
    }

    #[test]
    fn test_parse_case_insensitive() {
        let query = parse_query("FIND task WHERE Status = Done ORDER BY -created LIMIT 5").unwrap();
        assert_eq!(query.where_.len(), 1);
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn test_parse_error_invalid_query() {
        assert!(matches!(parse_query("select task"), Err(QueryError::Parse(_))));
        assert!(matches!(
            parse_query("find task where"),
            Err(QueryError::Parse(_))
        ));
        assert!(matches!(
            parse_query("find task limit ten"),
            Err(QueryError::Parse(_))
        ));
    }

    #[test]
    fn test_classify_token() {
        assert_eq!(classify_token("42"), QueryValue::Integer(42));
        assert_eq!(classify_token("-2.5"), QueryValue::Float(-2.5));
        assert_eq!(classify_token("7d"), QueryValue::from("7d"));
        assert_eq!(classify_token("NaN"), QueryValue::from("NaN"));
        assert_eq!(classify_token("2024-01-01"), QueryValue::from("2024-01-01"));
    }
}
