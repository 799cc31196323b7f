// Interpreter tunables.

use ron::de::from_str;
use serde::Deserialize;


#[derive(Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct Tunables {
    // Trampoline iterations between signal checks.
    pub eval_period: u32,
    // Cells the transient data stack may hold.
    pub data_stack_limit: usize,
    // Bytes reserved up front for the mold buffer.
    pub mold_reserve: usize,
}


impl Default for Tunables {
    fn default() -> Tunables {
        Tunables {
            eval_period: 64,
            data_stack_limit: 4096,
            mold_reserve: 1024,
        }
    }
}


impl Tunables {
    pub fn from_ron(text: &str) -> Result<Tunables, ron::de::Error> {
        from_str(text)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = Tunables::default();
        assert_eq!(t.eval_period, 64);
        assert!(t.data_stack_limit > 0);
    }

    #[test]
    fn test_ron_overrides() {
        let t = Tunables::from_ron("(eval_period: 8)").unwrap();
        assert_eq!(t.eval_period, 8);
        assert_eq!(t.data_stack_limit, Tunables::default().data_stack_limit);
    }

    #[test]
    fn test_bad_ron_reports() {
        assert!(Tunables::from_ron("(eval_period: \"x\")").is_err());
    }
}
