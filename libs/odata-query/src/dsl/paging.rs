//! `$top`, `$skip` and `$count`

use super::call;
use crate::error::Result;
use crate::expr::Expression;
use crate::signature::QueryFamily;

/// # Errors
/// Propagates argument errors.
pub fn top(n: i64) -> Result<Expression> {
    call(QueryFamily::Top, "top", vec![Expression::constant(n)])
}

/// # Errors
/// Propagates argument errors.
pub fn skip(n: i64) -> Result<Expression> {
    call(QueryFamily::Skip, "skip", vec![Expression::constant(n)])
}

/// `$count=true`; the clause renders empty and the URI layer fills in `true`.
///
/// # Errors
/// Propagates argument errors.
pub fn count() -> Result<Expression> {
    call(QueryFamily::Count, "count", Vec::new())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::eval::{Evaluator, ParamSink};
    use crate::schema::Schema;
    use crate::value::DefaultSerializer;

    #[test]
    fn paging_values() {
        let schema = Arc::new(Schema::new());
        let ev = Evaluator::new(&schema, &DefaultSerializer);
        let mut sink = ParamSink::default();
        assert_eq!(ev.render(&top(10).unwrap(), &mut sink).unwrap(), "10");
        assert_eq!(ev.render(&skip(20).unwrap(), &mut sink).unwrap(), "20");
        assert_eq!(ev.render(&count().unwrap(), &mut sink).unwrap(), "");
    }
}
