//! Cypher parser using Pest
//!
//! The grammar in `cypher.pest` recognizes the query; this module walks the
//! resulting pairs into the [`ast`](super::ast). Expression precedence is
//! resolved with a Pratt parser, lowest to highest:
//! `OR`, `XOR`, `AND`, `NOT`, comparisons and string/list predicates,
//! `+ -`, `* / %`, `^`, unary minus.

use super::ast::*;
use super::error::{CompileError, CompileResult};
use super::lexer::{self, Token};
use crate::graph::Direction;
use pest::error::LineColLocation;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;

#[derive(Parser)]
#[grammar = "query/cypher.pest"]
struct CypherParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::xor_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::comparison_op, Assoc::Left)
            | Op::infix(Rule::starts_with_op, Assoc::Left)
            | Op::infix(Rule::ends_with_op, Assoc::Left)
            | Op::infix(Rule::contains_op, Assoc::Left)
            | Op::infix(Rule::in_op, Assoc::Left)
            | Op::postfix(Rule::is_null)
            | Op::postfix(Rule::is_not_null))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left)
            | Op::infix(Rule::div_op, Assoc::Left)
            | Op::infix(Rule::mod_op, Assoc::Left))
        .op(Op::infix(Rule::pow_op, Assoc::Right))
        .op(Op::prefix(Rule::neg_op) | Op::prefix(Rule::pos_op))
});

/// Parse a query string into an AST
pub fn parse_query(input: &str) -> CompileResult<Query> {
    let tokens = lexer::tokenize(input)?;
    parse_tokens(input, &tokens)
}

/// Parse a query that has already been tokenized
///
/// The tokens are used to render the canonical text of projection items.
pub fn parse_tokens(input: &str, tokens: &[Token]) -> CompileResult<Query> {
    let mut pairs = CypherParser::parse(Rule::query, input).map_err(syntax_error)?;
    let query = pairs
        .next()
        .ok_or_else(|| CompileError::syntax(1, 1, "Empty query"))?;
    AstBuilder { tokens }.query(query)
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::single_query => "a clause".to_string(),
        other => format!("{:?}", other).to_lowercase().replace('_', " "),
    }
}

fn syntax_error(error: pest::error::Error<Rule>) -> CompileError {
    let (line, column) = match error.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    let error = error.renamed_rules(describe_rule);
    CompileError::syntax(line, column, error.variant.message().into_owned())
}

fn position(pair: &Pair<'_>) -> Position {
    let (line, column) = pair.as_span().start_pos().line_col();
    Position::new(line, column)
}

fn unexpected(pair: &Pair<'_>) -> CompileError {
    let pos = position(pair);
    CompileError::syntax(pos.line, pos.column, format!("Unexpected {:?}", pair.as_rule()))
}

/// Text of a name rule, with escaped names unquoted
fn symbolic_name(pair: Pair<'_>) -> String {
    match pair.as_rule() {
        Rule::identifier => pair.as_str().to_string(),
        Rule::escaped_name => pair
            .into_inner()
            .next()
            .map(|inner| inner.as_str().replace("``", "`"))
            .unwrap_or_default(),
        _ => match pair.clone().into_inner().next() {
            Some(inner) => symbolic_name(inner),
            None => pair.as_str().to_string(),
        },
    }
}

fn ident(pair: Pair<'_>) -> Ident {
    let pos = position(&pair);
    Ident {
        name: symbolic_name(pair),
        pos,
    }
}

struct AstBuilder<'t> {
    tokens: &'t [Token],
}

impl AstBuilder<'_> {
    fn text(&self, pair: &Pair<'_>) -> String {
        let span = pair.as_span();
        lexer::canonical_between(self.tokens, span.start(), span.end())
    }

    fn query(&self, pair: Pair<'_>) -> CompileResult<Query> {
        let mut first = None;
        let mut unions = Vec::new();
        let mut pending: Option<(bool, Position)> = None;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::single_query => {
                    let query = self.single_query(inner)?;
                    match pending.take() {
                        Some((all, pos)) => unions.push(Union { all, pos, query }),
                        None => first = Some(query),
                    }
                }
                Rule::union => {
                    let pos = position(&inner);
                    let all = inner.into_inner().any(|p| p.as_rule() == Rule::ALL);
                    pending = Some((all, pos));
                }
                _ => {}
            }
        }

        let first = first.ok_or_else(|| CompileError::syntax(1, 1, "Empty query"))?;
        Ok(Query { first, unions })
    }

    fn single_query(&self, pair: Pair<'_>) -> CompileResult<SingleQuery> {
        let clauses = pair
            .into_inner()
            .map(|clause| self.clause(clause))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(SingleQuery { clauses })
    }

    fn clause(&self, pair: Pair<'_>) -> CompileResult<Clause> {
        let pos = position(&pair);
        let kind = match pair.as_rule() {
            Rule::match_clause => {
                let mut optional = false;
                let mut pattern = Vec::new();
                let mut predicate = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::OPTIONAL => optional = true,
                        Rule::pattern => pattern = self.pattern(inner)?,
                        Rule::where_clause => predicate = Some(self.where_clause(inner)?),
                        _ => {}
                    }
                }
                ClauseKind::Match {
                    optional,
                    pattern,
                    predicate,
                }
            }
            Rule::unwind_clause => {
                let mut expression = None;
                let mut variable = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::expression => expression = Some(self.expression(inner)?),
                        Rule::variable => variable = Some(ident(inner)),
                        _ => {}
                    }
                }
                match (expression, variable) {
                    (Some(expression), Some(variable)) => ClauseKind::Unwind { expression, variable },
                    _ => return Err(CompileError::syntax(pos.line, pos.column, "Malformed UNWIND")),
                }
            }
            Rule::with_clause => {
                let mut projection = None;
                let mut predicate = None;
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::projection_body => projection = Some(self.projection(inner)?),
                        Rule::where_clause => predicate = Some(self.where_clause(inner)?),
                        _ => {}
                    }
                }
                let projection =
                    projection.ok_or_else(|| CompileError::syntax(pos.line, pos.column, "Malformed WITH"))?;
                ClauseKind::With { projection, predicate }
            }
            Rule::return_clause => {
                let body = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::projection_body)
                    .ok_or_else(|| CompileError::syntax(pos.line, pos.column, "Malformed RETURN"))?;
                ClauseKind::Return(self.projection(body)?)
            }
            Rule::create_clause => {
                let pattern = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::pattern)
                    .ok_or_else(|| CompileError::syntax(pos.line, pos.column, "Malformed CREATE"))?;
                ClauseKind::Create(self.pattern(pattern)?)
            }
            Rule::set_clause => {
                let items = pair
                    .into_inner()
                    .filter(|p| p.as_rule() != Rule::SET)
                    .map(|p| self.set_item(p))
                    .collect::<CompileResult<Vec<_>>>()?;
                ClauseKind::Set(items)
            }
            Rule::remove_clause => {
                let items = pair
                    .into_inner()
                    .filter(|p| p.as_rule() != Rule::REMOVE)
                    .map(|p| self.remove_item(p))
                    .collect::<CompileResult<Vec<_>>>()?;
                ClauseKind::Remove(items)
            }
            Rule::delete_clause => {
                let mut detach = false;
                let mut targets = Vec::new();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::DETACH => detach = true,
                        Rule::expression => targets.push(self.expression(inner)?),
                        _ => {}
                    }
                }
                ClauseKind::Delete { detach, targets }
            }
            _ => return Err(unexpected(&pair)),
        };
        Ok(Clause { pos, kind })
    }

    fn where_clause(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        let pos = position(&pair);
        let expr = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::expression)
            .ok_or_else(|| CompileError::syntax(pos.line, pos.column, "Expected an expression after WHERE"))?;
        self.expression(expr)
    }

    fn set_item(&self, pair: Pair<'_>) -> CompileResult<SetItem> {
        let rule = pair.as_rule();
        let pos = position(&pair);
        let mut variable = None;
        let mut key = None;
        let mut value = None;
        let mut labels = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::variable => variable = Some(ident(inner)),
                Rule::property_key => key = Some(symbolic_name(inner)),
                Rule::expression => value = Some(self.expression(inner)?),
                Rule::node_labels => labels = node_labels(inner),
                _ => {}
            }
        }
        let malformed = || CompileError::syntax(pos.line, pos.column, "Malformed SET item");
        let variable = variable.ok_or_else(malformed)?;
        Ok(match rule {
            Rule::set_property => SetItem::Property {
                variable,
                key: key.ok_or_else(malformed)?,
                value: value.ok_or_else(malformed)?,
            },
            Rule::set_merge => SetItem::Merge {
                variable,
                value: value.ok_or_else(malformed)?,
            },
            Rule::set_replace => SetItem::Replace {
                variable,
                value: value.ok_or_else(malformed)?,
            },
            _ => SetItem::Labels { variable, labels },
        })
    }

    fn remove_item(&self, pair: Pair<'_>) -> CompileResult<RemoveItem> {
        let rule = pair.as_rule();
        let pos = position(&pair);
        let mut variable = None;
        let mut key = None;
        let mut labels = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::variable => variable = Some(ident(inner)),
                Rule::property_key => key = Some(symbolic_name(inner)),
                Rule::node_labels => labels = node_labels(inner),
                _ => {}
            }
        }
        let malformed = || CompileError::syntax(pos.line, pos.column, "Malformed REMOVE item");
        let variable = variable.ok_or_else(malformed)?;
        Ok(match rule {
            Rule::remove_property => RemoveItem::Property {
                variable,
                key: key.ok_or_else(malformed)?,
            },
            _ => RemoveItem::Labels { variable, labels },
        })
    }

    fn projection(&self, pair: Pair<'_>) -> CompileResult<Projection> {
        let mut projection = Projection {
            distinct: false,
            star: false,
            items: Vec::new(),
            order_by: Vec::new(),
            skip: None,
            limit: None,
        };

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::DISTINCT => projection.distinct = true,
                Rule::projection_items => {
                    for item in inner.into_inner() {
                        match item.as_rule() {
                            Rule::star_items => {
                                projection.star = true;
                                for starred in item.into_inner() {
                                    projection.items.push(self.projection_item(starred)?);
                                }
                            }
                            Rule::projection_item => projection.items.push(self.projection_item(item)?),
                            _ => {}
                        }
                    }
                }
                Rule::order_by => {
                    for sort in inner.into_inner().filter(|p| p.as_rule() == Rule::sort_item) {
                        projection.order_by.push(self.sort_item(sort)?);
                    }
                }
                Rule::skip => projection.skip = Some(self.inner_expression(inner)?),
                Rule::limit => projection.limit = Some(self.inner_expression(inner)?),
                _ => {}
            }
        }

        Ok(projection)
    }

    fn inner_expression(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        let err = unexpected(&pair);
        let expr = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::expression)
            .ok_or(err)?;
        self.expression(expr)
    }

    fn projection_item(&self, pair: Pair<'_>) -> CompileResult<ProjectionItem> {
        let mut expression = None;
        let mut alias = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::expression => {
                    let text = self.text(&inner);
                    expression = Some((self.expression(inner)?, text));
                }
                Rule::variable => alias = Some(ident(inner)),
                _ => {}
            }
        }
        let (expression, text) = expression.ok_or_else(|| CompileError::syntax(1, 1, "Empty projection item"))?;
        Ok(ProjectionItem {
            expression,
            alias,
            text,
        })
    }

    fn sort_item(&self, pair: Pair<'_>) -> CompileResult<SortItem> {
        let mut expression = None;
        let mut descending = false;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::expression => {
                    let text = self.text(&inner);
                    expression = Some((self.expression(inner)?, text));
                }
                Rule::sort_direction => {
                    descending = inner
                        .into_inner()
                        .any(|d| matches!(d.as_rule(), Rule::DESC | Rule::DESCENDING));
                }
                _ => {}
            }
        }
        let (expression, text) = expression.ok_or_else(|| CompileError::syntax(1, 1, "Empty sort item"))?;
        Ok(SortItem {
            expression,
            descending,
            text,
        })
    }

    fn pattern(&self, pair: Pair<'_>) -> CompileResult<Vec<PathPattern>> {
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::path_pattern)
            .map(|p| self.path(p))
            .collect()
    }

    fn path(&self, pair: Pair<'_>) -> CompileResult<PathPattern> {
        let pos = position(&pair);
        let mut inner = pair.into_inner();
        let start = match inner.next() {
            Some(node) => self.node(node)?,
            None => return Err(CompileError::syntax(pos.line, pos.column, "Empty pattern")),
        };

        let mut steps = Vec::new();
        while let Some(rel) = inner.next() {
            let rel = self.relationship(rel)?;
            let node = match inner.next() {
                Some(node) => self.node(node)?,
                None => return Err(CompileError::syntax(pos.line, pos.column, "Pattern ends with a relationship")),
            };
            steps.push((rel, node));
        }

        Ok(PathPattern { start, steps })
    }

    fn node(&self, pair: Pair<'_>) -> CompileResult<NodePattern> {
        let pos = position(&pair);
        let mut node = NodePattern {
            variable: None,
            labels: Vec::new(),
            properties: Vec::new(),
            pos,
        };
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::variable => node.variable = Some(ident(inner)),
                Rule::node_labels => node.labels = node_labels(inner),
                Rule::map_literal => node.properties = self.map_entries(inner)?,
                _ => {}
            }
        }
        Ok(node)
    }

    fn relationship(&self, pair: Pair<'_>) -> CompileResult<RelationshipPattern> {
        let pos = position(&pair);
        let mut left = false;
        let mut right = false;
        let mut rel = RelationshipPattern {
            variable: None,
            types: Vec::new(),
            direction: Direction::Both,
            length: None,
            properties: Vec::new(),
            pos,
        };

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::left_arrow => left = true,
                Rule::right_arrow => right = true,
                Rule::rel_detail => {
                    for detail in inner.into_inner() {
                        match detail.as_rule() {
                            Rule::variable => rel.variable = Some(ident(detail)),
                            Rule::rel_types => {
                                rel.types = detail.into_inner().map(symbolic_name).collect();
                            }
                            Rule::rel_length => rel.length = Some(range_spec(detail)?),
                            Rule::map_literal => rel.properties = self.map_entries(detail)?,
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        rel.direction = match (left, right) {
            (false, true) => Direction::Outgoing,
            (true, false) => Direction::Incoming,
            _ => Direction::Both,
        };
        Ok(rel)
    }

    fn map_entries(&self, pair: Pair<'_>) -> CompileResult<Vec<(String, Expression)>> {
        let mut entries = Vec::new();
        for entry in pair.into_inner() {
            let pos = position(&entry);
            let mut inner = entry.into_inner();
            match (inner.next(), inner.next()) {
                (Some(key), Some(value)) => entries.push((symbolic_name(key), self.expression(value)?)),
                _ => return Err(CompileError::syntax(pos.line, pos.column, "Malformed map entry")),
            }
        }
        Ok(entries)
    }

    fn expression(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        PRATT_PARSER
            .map_primary(|primary| self.primary_term(primary))
            .map_prefix(|op, rhs| {
                let operand = rhs?;
                Ok(match op.as_rule() {
                    Rule::not_op => Expression::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    Rule::neg_op => match operand {
                        Expression::Literal(Literal::Integer(i)) => Expression::Literal(Literal::Integer(-i)),
                        Expression::Literal(Literal::Float(f)) => Expression::Literal(Literal::Float(-f)),
                        operand => Expression::Unary {
                            op: UnaryOp::Neg,
                            operand: Box::new(operand),
                        },
                    },
                    _ => operand,
                })
            })
            .map_postfix(|lhs, op| {
                Ok(Expression::IsNull {
                    operand: Box::new(lhs?),
                    negated: op.as_rule() == Rule::is_not_null,
                })
            })
            .map_infix(|lhs, op, rhs| {
                let op = binary_op(&op)?;
                Ok(Expression::Binary {
                    op,
                    left: Box::new(lhs?),
                    right: Box::new(rhs?),
                })
            })
            .parse(pair.into_inner())
    }

    fn primary_term(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        let mut inner = pair.clone().into_inner();
        let atom = inner.next().ok_or_else(|| unexpected(&pair))?;
        let mut expr = self.atom(atom)?;

        for accessor in inner {
            let err = unexpected(&accessor);
            match accessor.as_rule() {
                Rule::property_accessor => {
                    let key = accessor.into_inner().next().map(symbolic_name).ok_or(err)?;
                    expr = Expression::Property {
                        base: Box::new(expr),
                        key,
                    };
                }
                Rule::index_accessor => {
                    let index = accessor.into_inner().next().ok_or(err)?;
                    expr = Expression::Index {
                        base: Box::new(expr),
                        index: Box::new(self.expression(index)?),
                    };
                }
                _ => return Err(err),
            }
        }

        Ok(expr)
    }

    fn atom(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        let pos = position(&pair);
        let expr = match pair.as_rule() {
            Rule::null_literal => Expression::Literal(Literal::Null),
            Rule::boolean_literal => Expression::Literal(Literal::Boolean(
                pair.as_str().eq_ignore_ascii_case("true"),
            )),
            Rule::integer_literal => {
                let value = pair.as_str().parse::<i64>().map_err(|_| {
                    CompileError::syntax(pos.line, pos.column, format!("Integer literal {} is out of range", pair.as_str()))
                })?;
                Expression::Literal(Literal::Integer(value))
            }
            Rule::float_literal => {
                let value = pair.as_str().parse::<f64>().map_err(|_| {
                    CompileError::syntax(pos.line, pos.column, format!("Invalid float literal {}", pair.as_str()))
                })?;
                Expression::Literal(Literal::Float(value))
            }
            Rule::string_literal => {
                let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                let value = lexer::unescape(raw).map_err(|m| CompileError::lex(pos.line, pos.column, m))?;
                Expression::Literal(Literal::String(value))
            }
            Rule::parameter => {
                let name = pair.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default();
                Expression::Parameter(name)
            }
            Rule::case_expression => self.case_expression(pair)?,
            Rule::count_star => Expression::CountStar { pos },
            Rule::list_literal => Expression::List(
                pair.into_inner()
                    .map(|p| self.expression(p))
                    .collect::<CompileResult<Vec<_>>>()?,
            ),
            Rule::map_literal => Expression::Map(self.map_entries(pair)?),
            Rule::function_call => {
                let mut name = String::new();
                let mut distinct = false;
                let mut args = Vec::new();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::function_name => name = symbolic_name(inner),
                        Rule::DISTINCT => distinct = true,
                        Rule::expression => args.push(self.expression(inner)?),
                        _ => {}
                    }
                }
                Expression::FunctionCall {
                    name,
                    distinct,
                    args,
                    pos,
                }
            }
            Rule::variable => Expression::Variable(ident(pair)),
            Rule::parenthesized => {
                let err = unexpected(&pair);
                let inner = pair.into_inner().next().ok_or(err)?;
                self.expression(inner)?
            }
            _ => return Err(unexpected(&pair)),
        };
        Ok(expr)
    }

    fn case_expression(&self, pair: Pair<'_>) -> CompileResult<Expression> {
        let mut operand = None;
        let mut alternatives = Vec::new();
        let mut default = None;

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::case_operand => {
                    let err = unexpected(&inner);
                    let expr = inner.into_inner().next().ok_or(err)?;
                    operand = Some(Box::new(self.expression(expr)?));
                }
                Rule::case_alternative => {
                    let err = unexpected(&inner);
                    let mut parts = inner.into_inner().filter(|p| p.as_rule() == Rule::expression);
                    match (parts.next(), parts.next()) {
                        (Some(when), Some(then)) => {
                            alternatives.push((self.expression(when)?, self.expression(then)?));
                        }
                        _ => return Err(err),
                    }
                }
                Rule::case_else => {
                    let err = unexpected(&inner);
                    let expr = inner
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::expression)
                        .ok_or(err)?;
                    default = Some(Box::new(self.expression(expr)?));
                }
                _ => {}
            }
        }

        Ok(Expression::Case {
            operand,
            alternatives,
            default,
        })
    }
}

fn node_labels(pair: Pair<'_>) -> Vec<String> {
    pair.into_inner().map(symbolic_name).collect()
}

fn range_spec(pair: Pair<'_>) -> CompileResult<(Option<u64>, Option<u64>)> {
    let Some(spec) = pair.into_inner().next() else {
        // bare `*`
        return Ok((Some(1), None));
    };

    let parse = |p: &Pair<'_>| -> CompileResult<u64> {
        p.as_str().parse::<u64>().map_err(|_| {
            let pos = position(p);
            CompileError::syntax(pos.line, pos.column, format!("Invalid hop count {}", p.as_str()))
        })
    };

    let mut lower = None;
    let mut upper = None;
    for bound in spec.into_inner() {
        match bound.as_rule() {
            Rule::exact_hops => {
                let n = parse(&bound)?;
                return Ok((Some(n), Some(n)));
            }
            Rule::range_lower => lower = Some(parse(&bound)?),
            Rule::range_upper => upper = Some(parse(&bound)?),
            _ => {}
        }
    }
    Ok((lower, upper))
}

fn binary_op(pair: &Pair<'_>) -> CompileResult<BinaryOp> {
    Ok(match pair.as_rule() {
        Rule::or_op => BinaryOp::Or,
        Rule::xor_op => BinaryOp::Xor,
        Rule::and_op => BinaryOp::And,
        Rule::starts_with_op => BinaryOp::StartsWith,
        Rule::ends_with_op => BinaryOp::EndsWith,
        Rule::contains_op => BinaryOp::Contains,
        Rule::in_op => BinaryOp::In,
        Rule::add_op => BinaryOp::Add,
        Rule::sub_op => BinaryOp::Sub,
        Rule::mul_op => BinaryOp::Mul,
        Rule::div_op => BinaryOp::Div,
        Rule::mod_op => BinaryOp::Mod,
        Rule::pow_op => BinaryOp::Pow,
        Rule::comparison_op => match pair.as_str() {
            "=" => BinaryOp::Eq,
            "<>" | "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "=~" => BinaryOp::RegexMatch,
            _ => return Err(unexpected(pair)),
        },
        _ => return Err(unexpected(pair)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::CompileErrorKind;

    fn clauses(input: &str) -> Vec<ClauseKind> {
        parse_query(input)
            .unwrap()
            .first
            .clauses
            .into_iter()
            .map(|c| c.kind)
            .collect()
    }

    fn return_expr(input: &str) -> Expression {
        match clauses(input).pop() {
            Some(ClauseKind::Return(projection)) => projection.items[0].expression.clone(),
            other => panic!("expected RETURN, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_match() {
        let parsed = clauses("MATCH (n:Person) RETURN n");
        assert_eq!(parsed.len(), 2);
        match &parsed[0] {
            ClauseKind::Match { optional, pattern, predicate } => {
                assert!(!optional);
                assert!(predicate.is_none());
                assert_eq!(pattern[0].start.variable.as_ref().unwrap().name, "n");
                assert_eq!(pattern[0].start.labels, vec!["Person"]);
            }
            other => panic!("unexpected clause {:?}", other),
        }
    }

    #[test]
    fn test_parse_relationship_directions() {
        let parsed = clauses("MATCH (a)-[r:KNOWS|LIKES]->(b)<-[:OWNS]-(c)--(d) RETURN a");
        let ClauseKind::Match { pattern, .. } = &parsed[0] else {
            panic!("expected MATCH");
        };
        let steps = &pattern[0].steps;
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].0.direction, Direction::Outgoing);
        assert_eq!(steps[0].0.types, vec!["KNOWS", "LIKES"]);
        assert_eq!(steps[1].0.direction, Direction::Incoming);
        assert_eq!(steps[2].0.direction, Direction::Both);
        assert!(steps[2].0.variable.is_none());
    }

    #[test]
    fn test_parse_variable_length() {
        let parsed = clauses("MATCH (a)-[*1..3]->(b), (a)-[:R*]->(c), (a)-[*2]->(d), (a)-[*..4]->(e) RETURN a");
        let ClauseKind::Match { pattern, .. } = &parsed[0] else {
            panic!("expected MATCH");
        };
        let lengths: Vec<_> = pattern.iter().map(|p| p.steps[0].0.length).collect();
        assert_eq!(
            lengths,
            vec![
                Some((Some(1), Some(3))),
                Some((Some(1), None)),
                Some((Some(2), Some(2))),
                Some((None, Some(4))),
            ]
        );
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3
        let expr = return_expr("RETURN 1 + 2 * 3");
        let Expression::Binary { op: BinaryOp::Add, right, .. } = expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*right, Expression::Binary { op: BinaryOp::Mul, .. }));

        // NOT binds looser than comparison
        let expr = return_expr("RETURN NOT 1 = 2");
        let Expression::Unary { op: UnaryOp::Not, operand } = expr else {
            panic!("expected NOT at the root");
        };
        assert!(matches!(*operand, Expression::Binary { op: BinaryOp::Eq, .. }));

        // AND binds tighter than OR
        let expr = return_expr("RETURN true OR false AND false");
        assert!(matches!(expr, Expression::Binary { op: BinaryOp::Or, .. }));

        // ^ is right associative
        let expr = return_expr("RETURN 2 ^ 3 ^ 2");
        let Expression::Binary { op: BinaryOp::Pow, right, .. } = expr else {
            panic!("expected power at the root");
        };
        assert!(matches!(*right, Expression::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn test_postfix_and_string_predicates() {
        let expr = return_expr("RETURN n.name IS NOT NULL AND n.name STARTS WITH 'A'");
        let Expression::Binary { op: BinaryOp::And, left, right } = expr else {
            panic!("expected AND");
        };
        assert!(matches!(*left, Expression::IsNull { negated: true, .. }));
        assert!(matches!(*right, Expression::Binary { op: BinaryOp::StartsWith, .. }));
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(return_expr("RETURN -5"), Expression::Literal(Literal::Integer(-5)));
    }

    #[test]
    fn test_case_and_accessors() {
        let expr = return_expr("RETURN CASE n.x WHEN 1 THEN 'one' ELSE 'other' END");
        let Expression::Case { operand, alternatives, default } = expr else {
            panic!("expected CASE");
        };
        assert!(operand.is_some());
        assert_eq!(alternatives.len(), 1);
        assert!(default.is_some());

        let expr = return_expr("RETURN [1, 2, 3][0]");
        assert!(matches!(expr, Expression::Index { .. }));
    }

    #[test]
    fn test_projection_text_and_order() {
        let parsed = clauses("MATCH (n) RETURN DISTINCT n.name, count( * ) AS c ORDER BY c DESC, n.name SKIP 1 LIMIT 2");
        let ClauseKind::Return(projection) = &parsed[1] else {
            panic!("expected RETURN");
        };
        assert!(projection.distinct);
        assert_eq!(projection.items[0].text, "n.name");
        assert_eq!(projection.items[0].name(), "n.name");
        assert_eq!(projection.items[1].name(), "c");
        assert!(projection.order_by[0].descending);
        assert!(!projection.order_by[1].descending);
        assert!(projection.skip.is_some());
        assert!(projection.limit.is_some());
    }

    #[test]
    fn test_parse_updates() {
        let parsed = clauses(
            "MATCH (n) SET n.age = 3, n += {a: 1}, n = {b: 2}, n:Admin:Staff REMOVE n.x, n:Staff DETACH DELETE n",
        );
        let ClauseKind::Set(items) = &parsed[1] else {
            panic!("expected SET");
        };
        assert!(matches!(items[0], SetItem::Property { .. }));
        assert!(matches!(items[1], SetItem::Merge { .. }));
        assert!(matches!(items[2], SetItem::Replace { .. }));
        assert!(matches!(&items[3], SetItem::Labels { labels, .. } if labels.len() == 2));
        assert!(matches!(&parsed[2], ClauseKind::Remove(items) if items.len() == 2));
        assert!(matches!(&parsed[3], ClauseKind::Delete { detach: true, .. }));
    }

    #[test]
    fn test_parse_union() {
        let query = parse_query("RETURN 1 AS x UNION ALL RETURN 2 AS x UNION RETURN 3 AS x").unwrap();
        assert_eq!(query.unions.len(), 2);
        assert!(query.unions[0].all);
        assert!(!query.unions[1].all);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert!(parse_query("match (n) where n.x = 1 return n order by n.x desc").is_ok());
    }

    #[test]
    fn test_escaped_names_and_parameters() {
        let parsed = clauses("MATCH (`my node`:`Odd Label`) WHERE `my node`.x = $value RETURN `my node`");
        let ClauseKind::Match { pattern, predicate, .. } = &parsed[0] else {
            panic!("expected MATCH");
        };
        assert_eq!(pattern[0].start.variable.as_ref().unwrap().name, "my node");
        assert_eq!(pattern[0].start.labels, vec!["Odd Label"]);
        let Some(Expression::Binary { right, .. }) = predicate else {
            panic!("expected comparison");
        };
        assert_eq!(**right, Expression::Parameter("value".to_string()));
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_query("MATCH (n RETURN n").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert_eq!(err.line, 1);
        assert!(err.column > 1);

        let err = parse_query("MATCH (n)\nRETURN n +").unwrap_err();
        assert_eq!((err.kind, err.line), (CompileErrorKind::Syntax, 2));
    }

    #[test]
    fn test_lex_error_comes_first() {
        let err = parse_query("MATCH (n {name: 'open}) RETURN n").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Lex);
    }

    #[test]
    fn test_tokens_the_grammar_rejects_are_syntax_errors() {
        for text in ["MATCH (n) RETURN n;;", "RETURN 1 |", "MATCH (n)-->>(m) RETURN n", "RETURN +="] {
            let err = parse_query(text).unwrap_err();
            assert_eq!(err.kind, CompileErrorKind::Syntax, "{}", text);
        }
    }
}
