//! Parameter variables
//!
//! A variable is either a literal value or a reference to an output of
//! another stack. References to stacks defined in the same configuration are
//! "managed" and count as dependencies; references to anything else name a
//! remote stack directly.

use std::fmt;

/// The stack a dynamic variable reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackRef {
    /// A stack key from the configuration
    Managed(String),
    /// A deployed stack name outside the configuration
    External(String),
}

impl StackRef {
    /// The configuration key, for managed stacks
    pub fn key(&self) -> Option<&str> {
        match self {
            StackRef::Managed(key) => Some(key),
            StackRef::External(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StackRef::Managed(name) | StackRef::External(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    Static(String),
    Dynamic { stack: StackRef, output: String },
}

impl Variable {
    /// Parses `value`, `stack|Output` or `key=Output`
    ///
    /// `=` only makes a reference when the left side is a managed key, so
    /// literal values containing `=` stay static.
    pub fn parse(raw: &str, is_managed: impl Fn(&str) -> bool) -> Self {
        if let Some((stack, output)) = raw.split_once('|') {
            return Self::dynamic(stack.trim(), output.trim(), is_managed);
        }

        if let Some((stack, output)) = raw.split_once('=') {
            let stack = stack.trim();
            if is_managed(stack) && !output.trim().is_empty() {
                return Self::dynamic(stack, output.trim(), is_managed);
            }
        }

        Variable::Static(raw.to_string())
    }

    pub fn dynamic(stack: &str, output: &str, is_managed: impl Fn(&str) -> bool) -> Self {
        let stack = if is_managed(stack) {
            StackRef::Managed(stack.to_string())
        } else {
            StackRef::External(stack.to_string())
        };
        Variable::Dynamic {
            stack,
            output: output.to_string(),
        }
    }

    /// Key of the configured stack this variable depends on
    pub fn managed_stack(&self) -> Option<&str> {
        match self {
            Variable::Dynamic { stack, .. } => stack.key(),
            Variable::Static(_) => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Static(value) => f.write_str(value),
            Variable::Dynamic { stack, output } => write!(f, "{}|{}", stack.as_str(), output),
        }
    }
}

/// A pair of variables that, when equal, make an update unnecessary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipper {
    pub first: Variable,
    pub second: Variable,
}

impl Skipper {
    pub fn new(first: Variable, second: Variable) -> Self {
        Self { first, second }
    }

    /// True when both values resolve, are non-empty and are equal
    ///
    /// `resolve` returns `Ok(None)` when the referenced stack doesn't exist,
    /// which never counts as equivalent.
    pub fn equivalent<E>(
        &self,
        mut resolve: impl FnMut(&Variable) -> Result<Option<String>, E>,
    ) -> Result<bool, E> {
        let Some(first) = resolve(&self.first)? else {
            return Ok(false);
        };
        let Some(second) = resolve(&self.second)? else {
            return Ok(false);
        };
        Ok(!first.is_empty() && !second.is_empty() && first == second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed(name: &str) -> bool {
        matches!(name, "db" | "app")
    }

    #[test]
    fn plain_values_are_static() {
        assert_eq!(Variable::parse("hello", managed), Variable::Static("hello".into()));
        assert_eq!(
            Variable::parse("a=b", managed),
            Variable::Static("a=b".into()),
            "'=' against an unknown stack is a literal"
        );
    }

    #[test]
    fn pipe_references() {
        assert_eq!(
            Variable::parse("db|Endpoint", managed),
            Variable::Dynamic {
                stack: StackRef::Managed("db".into()),
                output: "Endpoint".into()
            }
        );
        assert_eq!(
            Variable::parse("shared-vpc|VpcId", managed),
            Variable::Dynamic {
                stack: StackRef::External("shared-vpc".into()),
                output: "VpcId".into()
            }
        );
    }

    #[test]
    fn equals_references_need_a_managed_stack() {
        let var = Variable::parse("app=Url", managed);
        assert_eq!(var.managed_stack(), Some("app"));
        assert_eq!(var.to_string(), "app|Url");
    }

    #[test]
    fn skipper_equivalence() {
        let skipper = Skipper::new(
            Variable::Static("v1".into()),
            Variable::parse("app|Version", managed),
        );

        let same = skipper.equivalent(|var| match var {
            Variable::Static(v) => Ok::<_, ()>(Some(v.clone())),
            Variable::Dynamic { .. } => Ok(Some("v1".into())),
        });
        assert_eq!(same, Ok(true));

        let missing = skipper.equivalent(|var| match var {
            Variable::Static(v) => Ok::<_, ()>(Some(v.clone())),
            Variable::Dynamic { .. } => Ok(None),
        });
        assert_eq!(missing, Ok(false));
    }

    #[test]
    fn empty_values_are_never_equivalent() {
        let skipper = Skipper::new(Variable::Static(String::new()), Variable::Static(String::new()));
        assert_eq!(skipper.equivalent(|_| Ok::<_, ()>(Some(String::new()))), Ok(false));
    }
}
