//! Closed sets of recognized library names.
//!
//! Every name the translator reacts to is listed in one of the tables below
//! and resolved to an enum once; nothing downstream compares strings.

use serde::Serialize;

/// Parallel algorithms that can be offloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelAlgorithm {
    /// `for_each(policy, first, last, f)`: one buffer, updated in place.
    ForEach,
    /// `transform(policy, first, last, out, f)`: input buffer and output buffer.
    Transform,
}

const ALGORITHMS: &[(&str, ParallelAlgorithm)] = &[
    ("std::for_each", ParallelAlgorithm::ForEach),
    ("std::transform", ParallelAlgorithm::Transform),
];

impl ParallelAlgorithm {
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches("::");
        ALGORITHMS.iter().find(|(n, _)| *n == name).map(|(_, a)| *a)
    }

    pub fn name(self) -> &'static str {
        match self {
            ParallelAlgorithm::ForEach => "for_each",
            ParallelAlgorithm::Transform => "transform",
        }
    }
}

/// Standard execution policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPolicy {
    Sequenced,
    Parallel,
    ParallelUnsequenced,
    Unsequenced,
}

const POLICIES: &[(&str, ExecutionPolicy)] = &[
    ("std::execution::seq", ExecutionPolicy::Sequenced),
    ("std::execution::par", ExecutionPolicy::Parallel),
    ("std::execution::par_unseq", ExecutionPolicy::ParallelUnsequenced),
    ("std::execution::unseq", ExecutionPolicy::Unsequenced),
];

impl ExecutionPolicy {
    pub fn from_qualified_name(name: &str) -> Option<Self> {
        let name = name.trim_start_matches("::");
        POLICIES.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
    }

    /// Only policies that permit concurrent invocations may run on the device.
    pub fn allows_offload(self) -> bool {
        matches!(self, ExecutionPolicy::Parallel | ExecutionPolicy::ParallelUnsequenced)
    }
}

/// Whitelisted math functions callable from translated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFunction {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Exp,
    Log,
    Pow,
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    Cbrt,
}

const MATH_FUNCTIONS: &[(&str, MathFunction)] = &[
    ("sin", MathFunction::Sin),
    ("sinf", MathFunction::Sin),
    ("cos", MathFunction::Cos),
    ("cosf", MathFunction::Cos),
    ("tan", MathFunction::Tan),
    ("tanf", MathFunction::Tan),
    ("sqrt", MathFunction::Sqrt),
    ("sqrtf", MathFunction::Sqrt),
    ("exp", MathFunction::Exp),
    ("expf", MathFunction::Exp),
    ("log", MathFunction::Log),
    ("logf", MathFunction::Log),
    ("pow", MathFunction::Pow),
    ("powf", MathFunction::Pow),
    ("abs", MathFunction::Abs),
    ("fabs", MathFunction::Abs),
    ("fabsf", MathFunction::Abs),
    ("floor", MathFunction::Floor),
    ("floorf", MathFunction::Floor),
    ("ceil", MathFunction::Ceil),
    ("ceilf", MathFunction::Ceil),
    ("min", MathFunction::Min),
    ("fmin", MathFunction::Min),
    ("fminf", MathFunction::Min),
    ("max", MathFunction::Max),
    ("fmax", MathFunction::Max),
    ("fmaxf", MathFunction::Max),
    ("cbrt", MathFunction::Cbrt),
    ("cbrtf", MathFunction::Cbrt),
];

impl MathFunction {
    /// Resolve a callee spelling. Accepts unqualified, `std::` and `::` forms.
    pub fn lookup(callee: &str) -> Option<Self> {
        let name = callee.trim_start_matches("::");
        let name = name.strip_prefix("std::").unwrap_or(name);
        MATH_FUNCTIONS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
    }

    pub fn arity(self) -> usize {
        match self {
            MathFunction::Pow | MathFunction::Min | MathFunction::Max => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_lookup() {
        assert_eq!(
            ParallelAlgorithm::from_qualified_name("std::for_each"),
            Some(ParallelAlgorithm::ForEach)
        );
        assert_eq!(
            ParallelAlgorithm::from_qualified_name("::std::transform"),
            Some(ParallelAlgorithm::Transform)
        );
        assert_eq!(ParallelAlgorithm::from_qualified_name("std::reduce"), None);
        assert_eq!(ParallelAlgorithm::from_qualified_name("my::for_each"), None);
    }

    #[test]
    fn test_policy_offload() {
        let par = ExecutionPolicy::from_qualified_name("std::execution::par").unwrap();
        let seq = ExecutionPolicy::from_qualified_name("std::execution::seq").unwrap();
        assert!(par.allows_offload());
        assert!(!seq.allows_offload());
        assert!(!ExecutionPolicy::Unsequenced.allows_offload());
    }

    #[test]
    fn test_math_spellings() {
        assert_eq!(MathFunction::lookup("std::sqrt"), Some(MathFunction::Sqrt));
        assert_eq!(MathFunction::lookup("sqrtf"), Some(MathFunction::Sqrt));
        assert_eq!(MathFunction::lookup("::fabs"), Some(MathFunction::Abs));
        assert_eq!(MathFunction::lookup("std::fmax"), Some(MathFunction::Max));
        assert_eq!(MathFunction::lookup("printf"), None);
        assert_eq!(MathFunction::Pow.arity(), 2);
    }
}
