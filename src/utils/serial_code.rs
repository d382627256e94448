use rand::Rng;

const SUFFIX_LEN: usize = 6;
const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Builds one candidate code: `prefix` followed by 6 random
/// uppercase-alphanumeric characters. Uniqueness against existing codes is
/// the caller's job (retry on collision).
pub fn generate_code(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Rental duration embedded in a code as its leading decimal digits
/// ("180AB12CD" -> 180 days). This is a structural property of the code
/// format; the registry's stored `duration_days` only ages the code itself.
pub fn parse_duration_days(code: &str) -> Option<i64> {
    let digits: String = code.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().filter(|d| *d > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_shape() {
        let code = generate_code("180");
        assert_eq!(code.len(), 3 + SUFFIX_LEN);
        assert!(code.starts_with("180"));
        assert!(
            code[3..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_parse_duration_days() {
        assert_eq!(parse_duration_days("180ABC123"), Some(180));
        assert_eq!(parse_duration_days("90XYZQWE"), Some(90));
        assert_eq!(parse_duration_days("7A1B2C3"), Some(7));
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        assert_eq!(parse_duration_days("ABCDEF"), None);
        assert_eq!(parse_duration_days(""), None);
        assert_eq!(parse_duration_days("0ABCDEF"), None);
    }
}
