use chrono::{DateTime, Duration, Utc};
use entity::segment::{
    BoolOperator, CountOperator, FieldFilter, FieldOperator, ListOperator, SegmentLeaf,
    SegmentTree, TimeframeOperator,
};
use entity::{contact, contact_event, contact_list};
use sea_query::{Alias, Condition, Expr, Query, SelectStatement, SimpleExpr, UnionType};
use std::fmt::Display;

/// A segment tree compiled to a single column (`email`) set expression
#[derive(Debug)]
pub struct CompiledSegment {
    pub select: SelectStatement,

    /// the tree contains at least one operator whose truth depends on the
    /// wall clock, such segments carry a `recompute_after` instant
    pub time_relative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    EmptyBranch,
    UnknownField(String),
    BadValue(String),
    MissingValue(&'static str),
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::EmptyBranch => write!(f, "branch node with no leaves"),
            CompileError::UnknownField(field) => write!(f, "unknown contact field: {}", field),
            CompileError::BadValue(msg) => write!(f, "bad filter value: {}", msg),
            CompileError::MissingValue(what) => write!(f, "missing filter value: {}", what),
        }
    }
}

/// Compiles a segment tree into a set expression over contact emails
///
/// `and` maps to INTERSECT, `or` to UNION, `not_in` list membership to
/// EXCEPT against the whole workspace contact set. Relative date windows
/// are resolved against `now` at compile time.
pub fn compile(
    workspace_id: i32,
    tree: &SegmentTree,
    now: DateTime<Utc>,
) -> Result<CompiledSegment, CompileError> {
    let mut time_relative = false;
    let select = compile_node(workspace_id, tree, now, &mut time_relative)?;

    Ok(CompiledSegment {
        select,
        time_relative,
    })
}

/// true when any leaf of the tree uses a relative date operator
pub fn has_relative_dates(tree: &SegmentTree) -> bool {
    match tree {
        SegmentTree::Branch(branch) => branch.leaves.iter().any(has_relative_dates),
        SegmentTree::Leaf(leaf) => matches!(
            leaf,
            SegmentLeaf::ContactTimeline {
                timeframe_operator: Some(TimeframeOperator::InTheLastDays),
                ..
            }
        ),
    }
}

fn compile_node(
    workspace_id: i32,
    tree: &SegmentTree,
    now: DateTime<Utc>,
    time_relative: &mut bool,
) -> Result<SelectStatement, CompileError> {
    match tree {
        SegmentTree::Leaf(leaf) => compile_leaf(workspace_id, leaf, now, time_relative),

        SegmentTree::Branch(branch) => {
            let mut children = branch.leaves.iter();

            let first = children.next().ok_or(CompileError::EmptyBranch)?;
            let mut set = wrap(compile_node(workspace_id, first, now, time_relative)?, 0);

            let union_type = match branch.operator {
                BoolOperator::And => UnionType::Intersect,
                BoolOperator::Or => UnionType::Distinct,
            };

            for (idx, child) in children.enumerate() {
                let compiled = compile_node(workspace_id, child, now, time_relative)?;
                set.union(union_type, wrap(compiled, idx as u32 + 1));
            }

            Ok(set)
        }
    }
}

/// wraps a compiled node in a subquery so nested INTERSECT / UNION / EXCEPT
/// combinations keep their tree grouping
fn wrap(select: SelectStatement, ordinal: u32) -> SelectStatement {
    Query::select()
        .column(Alias::new("email"))
        .from_subquery(select, Alias::new(format!("n{}", ordinal)))
        .to_owned()
}

fn compile_leaf(
    workspace_id: i32,
    leaf: &SegmentLeaf,
    now: DateTime<Utc>,
    time_relative: &mut bool,
) -> Result<SelectStatement, CompileError> {
    match leaf {
        SegmentLeaf::Contacts { filters } => contacts_select(workspace_id, filters),

        SegmentLeaf::ContactLists { operator, list_id } => {
            let members = Query::select()
                .column(contact_list::Column::Email)
                .from(contact_list::Entity)
                .and_where(Expr::col(contact_list::Column::WorkspaceId).eq(workspace_id))
                .and_where(Expr::col(contact_list::Column::ListId).eq(*list_id))
                .and_where(Expr::col(contact_list::Column::Status).eq("active"))
                .to_owned();

            match operator {
                ListOperator::In => Ok(members),

                // everyone in the workspace except the list members
                ListOperator::NotIn => {
                    let mut all = Query::select()
                        .column(contact::Column::Email)
                        .from(contact::Entity)
                        .and_where(Expr::col(contact::Column::WorkspaceId).eq(workspace_id))
                        .to_owned();

                    all.union(UnionType::Except, members);
                    Ok(all)
                }
            }
        }

        SegmentLeaf::ContactTimeline {
            kind,
            count_operator,
            count_value,
            timeframe_operator,
            timeframe_values,
        } => {
            let mut select = Query::select()
                .column(contact_event::Column::Email)
                .from(contact_event::Entity)
                .and_where(Expr::col(contact_event::Column::WorkspaceId).eq(workspace_id))
                .and_where(Expr::col(contact_event::Column::Kind).eq(kind.clone()))
                .to_owned();

            if let Some(op) = timeframe_operator {
                apply_timeframe(&mut select, *op, timeframe_values, now, time_relative)?;
            }

            let count = Expr::expr(Expr::cust("count(*)"));
            let having: SimpleExpr = match count_operator {
                CountOperator::AtLeast => count.gte(*count_value),
                CountOperator::AtMost => count.lte(*count_value),
                CountOperator::Exactly => count.eq(*count_value),
            };

            select
                .group_by_col(contact_event::Column::Email)
                .and_having(having);

            Ok(select)
        }
    }
}

fn apply_timeframe(
    select: &mut SelectStatement,
    operator: TimeframeOperator,
    values: &[String],
    now: DateTime<Utc>,
    time_relative: &mut bool,
) -> Result<(), CompileError> {
    let occurred_at = || Expr::col(contact_event::Column::OccurredAt);

    match operator {
        TimeframeOperator::InTheLastDays => {
            *time_relative = true;

            let days: i64 = values
                .first()
                .ok_or(CompileError::MissingValue("in_the_last_days window"))?
                .parse()
                .map_err(|_| CompileError::BadValue(String::from("window is not a number")))?;

            select.and_where(occurred_at().gte(now - Duration::days(days)));
        }

        TimeframeOperator::Before => {
            select.and_where(occurred_at().lt(parse_instant(values.first())?));
        }

        TimeframeOperator::After => {
            select.and_where(occurred_at().gt(parse_instant(values.first())?));
        }

        TimeframeOperator::Between => {
            select.and_where(occurred_at().gte(parse_instant(values.first())?));
            select.and_where(occurred_at().lt(parse_instant(values.get(1))?));
        }
    }

    Ok(())
}

fn parse_instant(value: Option<&String>) -> Result<DateTime<Utc>, CompileError> {
    let value = value.ok_or(CompileError::MissingValue("timeframe instant"))?;

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CompileError::BadValue(format!("not a RFC3339 instant: {}", value)))
}

fn contacts_select(
    workspace_id: i32,
    filters: &[FieldFilter],
) -> Result<SelectStatement, CompileError> {
    let mut condition = Condition::all().add(Expr::col(contact::Column::WorkspaceId).eq(workspace_id));

    for filter in filters {
        condition = condition.add(field_condition(filter)?);
    }

    Ok(Query::select()
        .column(contact::Column::Email)
        .from(contact::Entity)
        .cond_where(condition)
        .to_owned())
}

fn field_condition(filter: &FieldFilter) -> Result<SimpleExpr, CompileError> {
    let column = contact_column(&filter.field)?;
    let col = || Expr::col(column);

    let first = || {
        filter
            .values
            .first()
            .ok_or(CompileError::MissingValue("field filter value"))
    };

    let expr = match filter.operator {
        FieldOperator::Equals => col().eq(field_value(&filter.field, first()?)?),
        FieldOperator::NotEquals => col().ne(field_value(&filter.field, first()?)?),

        FieldOperator::In => {
            let values = filter
                .values
                .iter()
                .map(|v| field_value(&filter.field, v))
                .collect::<Result<Vec<_>, _>>()?;

            if values.is_empty() {
                return Err(CompileError::MissingValue("in operator values"));
            }

            col().is_in(values)
        }

        FieldOperator::Gte => col().gte(field_value(&filter.field, first()?)?),
        FieldOperator::Lte => col().lte(field_value(&filter.field, first()?)?),

        FieldOperator::Contains => {
            let value = first()?
                .as_str()
                .ok_or_else(|| CompileError::BadValue(String::from("contains needs a string")))?;

            col().like(format!("%{}%", value))
        }

        FieldOperator::IsSet => col().is_not_null(),
        FieldOperator::IsNotSet => col().is_null(),
    };

    Ok(expr)
}

/// maps a filter field name to its contact column, custom slots included
fn contact_column(field: &str) -> Result<contact::Column, CompileError> {
    use contact::Column::*;

    let column = match field {
        "email" => Email,
        "external_id" => ExternalId,
        "first_name" => FirstName,
        "last_name" => LastName,
        "country" => Country,
        "language" => Language,
        "created_at" => CreatedAt,
        "updated_at" => UpdatedAt,
        "custom_string_1" => CustomString1,
        "custom_string_2" => CustomString2,
        "custom_string_3" => CustomString3,
        "custom_string_4" => CustomString4,
        "custom_string_5" => CustomString5,
        "custom_number_1" => CustomNumber1,
        "custom_number_2" => CustomNumber2,
        "custom_number_3" => CustomNumber3,
        "custom_number_4" => CustomNumber4,
        "custom_number_5" => CustomNumber5,
        "custom_datetime_1" => CustomDatetime1,
        "custom_datetime_2" => CustomDatetime2,
        "custom_datetime_3" => CustomDatetime3,
        "custom_datetime_4" => CustomDatetime4,
        "custom_datetime_5" => CustomDatetime5,
        other => return Err(CompileError::UnknownField(String::from(other))),
    };

    Ok(column)
}

/// converts a JSON filter value into a bindable SQL value, datetime fields
/// are parsed so the bound parameter carries the right type
fn field_value(field: &str, value: &serde_json::Value) -> Result<sea_query::Value, CompileError> {
    let is_datetime_field =
        field.starts_with("custom_datetime") || field == "created_at" || field == "updated_at";

    match value {
        serde_json::Value::String(s) if is_datetime_field => {
            let instant = DateTime::parse_from_rfc3339(s)
                .map_err(|_| CompileError::BadValue(format!("not a RFC3339 instant: {}", s)))?;

            Ok(instant.with_timezone(&Utc).into())
        }

        serde_json::Value::String(s) => Ok(s.clone().into()),

        serde_json::Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                Ok(int.into())
            } else if let Some(float) = n.as_f64() {
                Ok(float.into())
            } else {
                Err(CompileError::BadValue(format!("unrepresentable number: {}", n)))
            }
        }

        serde_json::Value::Bool(b) => Ok((*b).into()),

        other => Err(CompileError::BadValue(format!(
            "unsupported filter value: {}",
            other
        ))),
    }
}

/// wraps a compiled set expression in a `count(*)`, used by previews and by
/// the first slice of a build to snapshot the total
pub fn count_select(compiled: SelectStatement) -> SelectStatement {
    Query::select()
        .expr_as(Expr::cust("count(*)"), Alias::new("cnt"))
        .from_subquery(compiled, Alias::new("seg"))
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::segment::SegmentBranch;
    use sea_query::PostgresQueryBuilder;
    use serde_json::json;

    fn country_leaf(country: &str) -> SegmentTree {
        SegmentTree::Leaf(SegmentLeaf::Contacts {
            filters: vec![FieldFilter {
                field: String::from("country"),
                operator: FieldOperator::Equals,
                values: vec![json!(country)],
            }],
        })
    }

    fn list_leaf(operator: ListOperator, list_id: i32) -> SegmentTree {
        SegmentTree::Leaf(SegmentLeaf::ContactLists { operator, list_id })
    }

    fn timeline_leaf(timeframe: Option<TimeframeOperator>, values: Vec<&str>) -> SegmentTree {
        SegmentTree::Leaf(SegmentLeaf::ContactTimeline {
            kind: String::from("message.opened"),
            count_operator: CountOperator::AtLeast,
            count_value: 3,
            timeframe_operator: timeframe,
            timeframe_values: values.into_iter().map(String::from).collect(),
        })
    }

    fn sql(tree: &SegmentTree) -> String {
        compile(1, tree, Utc::now())
            .unwrap()
            .select
            .to_string(PostgresQueryBuilder)
    }

    #[test]
    fn contacts_leaf_filters_on_workspace_and_fields() {
        let q = sql(&country_leaf("US"));

        assert!(q.contains("\"email\""));
        assert!(q.contains("\"workspace_id\" = 1"));
        assert!(q.contains("\"country\" = 'US'"));
    }

    #[test]
    fn and_compiles_to_intersect_or_to_union() {
        let and = SegmentTree::Branch(SegmentBranch {
            operator: BoolOperator::And,
            leaves: vec![country_leaf("US"), list_leaf(ListOperator::In, 5)],
        });
        assert!(sql(&and).contains("INTERSECT"));

        let or = SegmentTree::Branch(SegmentBranch {
            operator: BoolOperator::Or,
            leaves: vec![country_leaf("US"), country_leaf("CA")],
        });
        assert!(sql(&or).contains("UNION"));
    }

    #[test]
    fn not_in_list_compiles_to_except() {
        let q = sql(&list_leaf(ListOperator::NotIn, 5));

        assert!(q.contains("EXCEPT"));
        assert!(q.contains("\"list_id\" = 5"));
        assert!(q.contains("'active'"));
    }

    #[test]
    fn list_membership_only_counts_active_rows() {
        let q = sql(&list_leaf(ListOperator::In, 9));
        assert!(q.contains("\"status\" = 'active'"));
    }

    #[test]
    fn timeline_leaf_groups_and_counts() {
        let q = sql(&timeline_leaf(None, vec![]));

        assert!(q.contains("GROUP BY \"email\""));
        assert!(q.contains("count(*) >= 3"));
        assert!(q.contains("'message.opened'"));
    }

    #[test]
    fn relative_windows_mark_the_segment_time_relative() {
        let tree = timeline_leaf(Some(TimeframeOperator::InTheLastDays), vec!["7"]);

        let compiled = compile(1, &tree, Utc::now()).unwrap();
        assert!(compiled.time_relative);
        assert!(has_relative_dates(&tree));

        let absolute = timeline_leaf(
            Some(TimeframeOperator::Before),
            vec!["2024-06-01T00:00:00Z"],
        );
        let compiled = compile(1, &absolute, Utc::now()).unwrap();
        assert!(!compiled.time_relative);
        assert!(!has_relative_dates(&absolute));
    }

    #[test]
    fn relative_detection_recurses_into_branches() {
        let tree = SegmentTree::Branch(SegmentBranch {
            operator: BoolOperator::And,
            leaves: vec![
                country_leaf("US"),
                SegmentTree::Branch(SegmentBranch {
                    operator: BoolOperator::Or,
                    leaves: vec![timeline_leaf(Some(TimeframeOperator::InTheLastDays), vec!["30"])],
                }),
            ],
        });

        assert!(has_relative_dates(&tree));
    }

    #[test]
    fn empty_branches_fail_to_compile() {
        let tree = SegmentTree::Branch(SegmentBranch {
            operator: BoolOperator::And,
            leaves: vec![],
        });

        assert_eq!(
            compile(1, &tree, Utc::now()).unwrap_err(),
            CompileError::EmptyBranch
        );
    }

    #[test]
    fn unknown_fields_fail_to_compile() {
        let tree = SegmentTree::Leaf(SegmentLeaf::Contacts {
            filters: vec![FieldFilter {
                field: String::from("shoe_size"),
                operator: FieldOperator::Equals,
                values: vec![json!(42)],
            }],
        });

        assert!(matches!(
            compile(1, &tree, Utc::now()),
            Err(CompileError::UnknownField(_))
        ));
    }

    #[test]
    fn count_select_wraps_the_set_expression() {
        let compiled = compile(1, &country_leaf("US"), Utc::now()).unwrap();
        let q = count_select(compiled.select).to_string(PostgresQueryBuilder);

        assert!(q.starts_with("SELECT count(*)"));
    }
}
