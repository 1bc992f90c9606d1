//! Process exit codes.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Success,
    Failure,
}

impl ProcessExit {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_exit_zero() {
        assert_eq!(ProcessExit::Success.code(), 0);
    }

    #[test]
    fn failure_is_exit_one() {
        assert_eq!(ProcessExit::Failure.code(), 1);
    }
}
