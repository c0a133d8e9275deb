/// The closed comparison vocabulary for update predicates. Predicate keys
/// carry one of these as a suffix (`id__eq`, `tags__has_key`, ...); an
/// unrecognized suffix is a configuration error, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Neq,
    Lt,
    Gt,
    In,
    Nin,
    Lte,
    Gte,
    Contains,
    ContainedIn,
    HasKey,
    HasKeysAny,
    HasKeysAll,
}

impl CompareOperator {
    pub fn from_suffix(suffix: &str) -> Option<CompareOperator> {
        match suffix {
            "_eq" => Some(CompareOperator::Eq),
            "_neq" => Some(CompareOperator::Neq),
            "_lt" => Some(CompareOperator::Lt),
            "_gt" => Some(CompareOperator::Gt),
            "_in" => Some(CompareOperator::In),
            "_nin" => Some(CompareOperator::Nin),
            "_lte" => Some(CompareOperator::Lte),
            "_gte" => Some(CompareOperator::Gte),
            "_contains" => Some(CompareOperator::Contains),
            "_contained_in" => Some(CompareOperator::ContainedIn),
            "_has_key" => Some(CompareOperator::HasKey),
            "_has_keys_any" => Some(CompareOperator::HasKeysAny),
            "_has_keys_all" => Some(CompareOperator::HasKeysAll),
            _ => None,
        }
    }

    /// Renders `column <op> operand`. Set membership has no infix operator
    /// against an array operand, so `_in`/`_nin` use the ANY/ALL forms.
    pub fn render(&self, column: &str, operand: &str) -> String {
        match self {
            CompareOperator::In => format!("{column} = ANY({operand})"),
            CompareOperator::Nin => format!("{column} != ALL({operand})"),
            other => format!("{column} {} {operand}", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOperator::Eq => "=",
            CompareOperator::Neq => "!=",
            CompareOperator::Lt => "<",
            CompareOperator::Gt => ">",
            CompareOperator::In => "= ANY",
            CompareOperator::Nin => "!= ALL",
            CompareOperator::Lte => "<=",
            CompareOperator::Gte => ">=",
            CompareOperator::Contains => "@>",
            CompareOperator::ContainedIn => "<@",
            CompareOperator::HasKey => "?",
            CompareOperator::HasKeysAny => "?|",
            CompareOperator::HasKeysAll => "?&",
        }
    }
}
