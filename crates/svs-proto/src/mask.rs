//! Hostmask matching and normalization.
//!
//! Stored channel bans and server-wide bans are plain `nick!user@host`
//! strings with `*` and `?` wildcards. Matching folds both sides through
//! RFC 1459 casemapping. [`collapse`] reduces runs of `*` so the
//! `(channel, mask)` uniqueness key is canonical; it is idempotent.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::casemap::irc_lower_char;

/// Wildcard match of `mask` against `target` under IRC casefolding.
///
/// `*` matches any run (including empty), `?` matches exactly one
/// character. Iterative with one backtrack point, so hostile masks cannot
/// blow the stack.
pub fn match_mask(mask: &str, target: &str) -> bool {
    let m: Vec<char> = mask.chars().map(irc_lower_char).collect();
    let t: Vec<char> = target.chars().map(irc_lower_char).collect();

    let (mut mi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if mi < m.len() && (m[mi] == '?' || m[mi] == t[ti]) {
            mi += 1;
            ti += 1;
        } else if mi < m.len() && m[mi] == '*' {
            star = Some((mi, ti));
            mi += 1;
        } else if let Some((smi, sti)) = star {
            mi = smi + 1;
            ti = sti + 1;
            star = Some((smi, sti + 1));
        } else {
            return false;
        }
    }

    while mi < m.len() && m[mi] == '*' {
        mi += 1;
    }
    mi == m.len()
}

/// Collapse runs of `*` into a single `*`.
pub fn collapse(mask: &str) -> String {
    let mut out = String::with_capacity(mask.len());
    let mut prev_star = false;
    for c in mask.chars() {
        if c == '*' {
            if !prev_star {
                out.push('*');
            }
            prev_star = true;
        } else {
            out.push(c);
            prev_star = false;
        }
    }
    out
}

/// Normalize user input into a full `nick!user@host` mask.
///
/// `nick` alone becomes `nick!*@*`, `user@host` becomes `*!user@host`,
/// and a full mask passes through. Empty segments are widened to `*`.
pub fn make_usermask(input: &str) -> String {
    let (nick, rest) = match input.find('!') {
        Some(pos) => (&input[..pos], &input[pos + 1..]),
        None => {
            if input.contains('@') {
                ("*", input)
            } else {
                (input, "*@*")
            }
        }
    };

    let (user, host) = match rest.find('@') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, "*"),
    };

    let widen = |s: &str| if s.is_empty() { "*".to_string() } else { s.to_string() };
    format!("{}!{}@{}", widen(nick), widen(user), widen(host))
}

/// Match an IP address against the host part of a CIDR ban mask.
///
/// `mask_host` is either `a.b.c.d/len` (or the v6 equivalent) or a bare
/// address. Non-address masks and unparsable client IPs never match.
pub fn cidr_match(mask_host: &str, ip: &str) -> bool {
    let Ok(addr) = IpAddr::from_str(ip) else {
        return false;
    };

    if let Ok(net) = IpNet::from_str(mask_host) {
        return net.contains(&addr);
    }
    if let Ok(single) = IpAddr::from_str(mask_host) {
        return single == addr;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_match_casefolded() {
        assert!(match_mask("*!*@evil.example", "Bob!user@Evil.Example"));
        assert!(match_mask("b?b!*@*", "bob!x@y"));
        assert!(match_mask("*", "anything"));
        assert!(!match_mask("*!*@evil.example", "bob!user@good.example"));
    }

    #[test]
    fn star_backtracks() {
        assert!(match_mask("*abc*abc", "zabcXabcabc"));
        assert!(!match_mask("*abc", "ab"));
    }

    #[test]
    fn fold_aware_matching() {
        assert!(match_mask("nick[a]!*@*", "NICK{A}!u@h"));
    }

    #[test]
    fn collapse_is_idempotent() {
        assert_eq!(collapse("***!**@*h*"), "*!*@*h*");
        let once = collapse("a**?**b");
        assert_eq!(collapse(&once), once);
        assert_eq!(once, "a*?*b");
    }

    #[test]
    fn usermask_forms() {
        assert_eq!(make_usermask("bob"), "bob!*@*");
        assert_eq!(make_usermask("user@host"), "*!user@host");
        assert_eq!(make_usermask("a!b@c"), "a!b@c");
        assert_eq!(make_usermask("a!@c"), "a!*@c");
    }

    #[test]
    fn cidr_matches_prefixes() {
        assert!(cidr_match("192.168.0.0/24", "192.168.0.17"));
        assert!(!cidr_match("192.168.0.0/24", "192.168.1.17"));
        assert!(cidr_match("10.0.0.1", "10.0.0.1"));
        assert!(!cidr_match("evil.example", "10.0.0.1"));
        assert!(cidr_match("2001:db8::/32", "2001:db8::1"));
    }
}
