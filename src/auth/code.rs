//! Daily rotating access codes.
//!
//! A code is never stored: it is recomputed on every verification as
//! `sha256(secret_digest + calendar_day + calendar_year)`. Today's code
//! is accepted, and as a grace window so is yesterday's — computed with
//! yesterday's own day/year pair, so a code issued just before midnight
//! (or a year rollover) stays valid briefly without the server tracking
//! client clocks. Anything older is rejected.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the input string.
pub fn hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// Digest a plain password with its creation-date salt.
pub fn digest_password(password: &str, creation_date: &str) -> String {
    hash(&format!("{password}{creation_date}"))
}

/// ISO-8601 seconds-precision UTC timestamp for a new account.
pub fn creation_date_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Derive the access code for a secret digest on a given calendar date.
pub fn derive(secret_digest: &str, date: NaiveDate) -> String {
    hash(&format!("{secret_digest}{}{}", date.day(), date.year()))
}

/// Check a candidate code against today's and yesterday's derivations.
pub fn verify(secret_digest: &str, candidate: &str, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if constant_time_eq(derive(secret_digest, today).as_bytes(), candidate.as_bytes()) {
        return true;
    }
    match today.pred_opt() {
        Some(yesterday) => {
            constant_time_eq(derive(secret_digest, yesterday).as_bytes(), candidate.as_bytes())
        }
        None => false,
    }
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, TimeZone};

    fn at(date: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap())
    }

    #[test]
    fn derive_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(derive("digest", date), derive("digest", date));
        assert_ne!(derive("digest", date), derive("other", date));
    }

    #[test]
    fn todays_code_verifies() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let code = derive("digest", date);
        assert!(verify("digest", &code, at(date)));
    }

    #[test]
    fn yesterdays_code_still_verifies() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let code = derive("digest", date);
        let tomorrow = date.checked_add_days(Days::new(1)).unwrap();
        assert!(verify("digest", &code, at(tomorrow)));
    }

    #[test]
    fn two_day_old_code_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let code = derive("digest", date);
        let later = date.checked_add_days(Days::new(2)).unwrap();
        assert!(!verify("digest", &code, at(later)));
    }

    #[test]
    fn grace_window_uses_yesterdays_own_pair_across_year_rollover() {
        let dec31 = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let code = derive("digest", dec31);
        // The code embeds day 31 / year 2024, not "day 0 of 2025".
        assert!(verify("digest", &code, at(jan1)));
    }

    #[test]
    fn rotation_pair_ignores_month() {
        // Day + year (no month) is the rotation pair: March 14 and
        // April 14 of the same year derive the same code.
        let mar = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let apr = NaiveDate::from_ymd_opt(2025, 4, 14).unwrap();
        assert_eq!(derive("digest", mar), derive("digest", apr));
    }

    #[test]
    fn password_digest_depends_on_creation_date_salt() {
        let a = digest_password("pw", "2025-01-01T00:00:00Z");
        let b = digest_password("pw", "2025-01-02T00:00:00Z");
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
