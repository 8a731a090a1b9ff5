//! JavaScript rendering of scalar expressions.
//!
//! Druid evaluates anything its native extraction functions cannot express
//! through JavaScript snippets. Attribute references are rendered through a
//! caller-supplied naming function, so the same expression can become
//! `function(d){...}` over one dimension or an aggregator over named fields.

use crate::external::{CompileError, CompileResult};
use crate::model::types::format_number;
use crate::model::{Expression, PlyType, Value};

/// Maps an attribute name to the JavaScript variable holding it.
pub type VarNamer<'a> = dyn Fn(&str) -> CompileResult<String> + 'a;

/// JavaScript source for `expr`.
pub fn to_js(expr: &Expression, var: &VarNamer<'_>) -> CompileResult<String> {
    let js = |e: &Expression| to_js(e, var);
    let bin = |a: &Expression, op: &str, b: &Expression| -> CompileResult<String> {
        Ok(format!("({}{}{})", js(a)?, op, js(b)?))
    };
    Ok(match expr {
        Expression::Ref { name } => var(name)?,
        Expression::Literal { value } => literal(value)?,

        Expression::Add {
            operand,
            expression,
        }
        | Expression::Concat {
            operand,
            expression,
        } => bin(operand, "+", expression)?,
        Expression::Subtract {
            operand,
            expression,
        } => bin(operand, "-", expression)?,
        Expression::Multiply {
            operand,
            expression,
        } => bin(operand, "*", expression)?,
        Expression::Divide {
            operand,
            expression,
        } => bin(operand, "/", expression)?,
        Expression::Power {
            operand,
            expression,
        } => format!("Math.pow({},{})", js(operand)?, js(expression)?),
        Expression::Absolute { operand } => format!("Math.abs({})", js(operand)?),

        Expression::Is {
            operand,
            expression,
        } => bin(operand, "===", expression)?,
        Expression::GreaterThan {
            operand,
            expression,
        } => bin(operand, ">", expression)?,
        Expression::GreaterThanOrEqual {
            operand,
            expression,
        } => bin(operand, ">=", expression)?,
        Expression::LessThan {
            operand,
            expression,
        } => bin(operand, "<", expression)?,
        Expression::LessThanOrEqual {
            operand,
            expression,
        } => bin(operand, "<=", expression)?,
        Expression::And { operands } | Expression::Or { operands } => {
            let op = if matches!(expr, Expression::And { .. }) {
                "&&"
            } else {
                "||"
            };
            let parts = operands.iter().map(js).collect::<CompileResult<Vec<_>>>()?;
            format!("({})", parts.join(op))
        }
        Expression::Not { operand } => format!("(!{})", js(operand)?),

        Expression::Contains {
            operand,
            expression,
            ignore_case: false,
        } => format!("(''+{}).indexOf({})>-1", js(operand)?, js(expression)?),
        Expression::Contains {
            operand,
            expression,
            ignore_case: true,
        } => format!(
            "(''+{}).toLowerCase().indexOf((''+{}).toLowerCase())>-1",
            js(operand)?,
            js(expression)?
        ),
        Expression::Match { operand, regexp } => {
            format!("RegExp({}).test({})", json_string(regexp), js(operand)?)
        }
        Expression::IndexOf {
            operand,
            expression,
        } => format!("(''+{}).indexOf({})", js(operand)?, js(expression)?),
        Expression::Substr {
            operand,
            position,
            len,
        } => format!("(''+{}).substr({},{})", js(operand)?, position, len),
        Expression::Extract { operand, regexp } => format!(
            "((''+{}).match(RegExp({}))||[])[1]||null",
            js(operand)?,
            json_string(regexp)
        ),
        Expression::Fallback {
            operand,
            expression,
        } => {
            let a = js(operand)?;
            format!("({}!=null?{}:{})", a, a, js(expression)?)
        }
        Expression::NumberBucket {
            operand,
            size,
            offset,
        } => number_floor(&js(operand)?, *size, *offset),
        Expression::Cast {
            operand,
            output_type: PlyType::Number,
        } => format!("Number({})", js(operand)?),
        Expression::Cast {
            operand,
            output_type: PlyType::String,
        } => format!("String({})", js(operand)?),

        other => {
            return Err(CompileError::unsupported(format!(
                "{} in a javascript expression",
                other.op_name()
            )))
        }
    })
}

fn literal(value: &Value) -> CompileResult<String> {
    Ok(match value {
        Value::Null => "null".into(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => json_string(s),
        other => {
            return Err(CompileError::unsupported(format!(
                "{} literal in a javascript expression",
                other.ply_type()
            )))
        }
    })
}

/// A double-quoted JavaScript string literal.
pub fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// `Math.floor(x / size) * size`, shifted by `offset` when it is non-zero.
pub fn number_floor(x: &str, size: f64, offset: f64) -> String {
    let size = format_number(size);
    if offset == 0.0 {
        format!("Math.floor({} / {}) * {}", x, size, size)
    } else {
        let offset = format_number(offset);
        format!(
            "Math.floor(({} - {}) / {}) * {} + {}",
            x, offset, size, size, offset
        )
    }
}

/// `function(d){return ...;}` over a single dimension.
pub fn dimension_function(expr: &Expression, dimension: &str) -> CompileResult<String> {
    let body = to_js(expr, &|name| {
        if name == dimension {
            Ok("d".to_string())
        } else {
            Err(CompileError::unsupported(format!(
                "javascript over more than one attribute ({} and {})",
                dimension, name
            )))
        }
    })?;
    Ok(format!("function(d){{return {};}}", body))
}

/// Numeric bucketing of a dimension that may hold non-numbers.
pub fn number_bucket_function(size: f64, offset: f64) -> String {
    format!(
        "function(d){{d=Number(d); if(isNaN(d)) return 'null'; return {};}}",
        number_floor("d", size, offset)
    )
}

/// Re-bucketing of pre-bucketed `lo<sep>hi` range strings.
///
/// Values that do not parse as a range of `range_size` become `'null'`. The
/// range start is zero-padded so the dimension sorts lexicographically.
pub fn range_bucket_function(
    separator: &str,
    range_size: f64,
    digits_after_decimal: Option<u32>,
    rebucket: Option<(f64, f64)>,
) -> String {
    let fraction = match digits_after_decimal {
        Some(n) => format!("\\d{{{}}}", n),
        None => "\\d+".to_string(),
    };
    let number = format!("((?:-?[1-9]\\d*|0)\\.{})", fraction);
    let separator = regex::escape(separator).replace('/', "\\/");
    let rebucket = rebucket
        .map(|(size, offset)| format!(" s={};", number_floor("s", size, offset)))
        .unwrap_or_else(|| " ".to_string());
    format!(
        "function(d) {{\nvar m = d.match(/^{n}{sep}{n}$/);\nif(!m) return 'null';\nvar s = +m[1];\nif(!(Math.abs(+m[2] - s - {size}) < 1e-6)) return 'null';{rebucket}\nvar parts = String(Math.abs(s)).split('.');\nparts[0] = ('000000000' + parts[0]).substr(-10);\nreturn (s < 0 ?'-':'') + parts.join('.');\n}}",
        n = number,
        sep = separator,
        size = format_number(range_size),
        rebucket = rebucket,
    )
}
