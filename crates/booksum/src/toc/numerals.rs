//! Numeral parsing for chapter headings: ASCII and full-width digits,
//! kanji numerals (positional and multiplicative), daiji and Roman numerals.

pub fn parse_numeral(token: &str) -> Option<u32> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    parse_digits(token)
        .or_else(|| parse_kanji(token))
        .or_else(|| parse_roman(token))
}

/// ASCII or full-width Arabic digits.
pub fn parse_digits(token: &str) -> Option<u32> {
    let mut value: u32 = 0;
    for c in token.chars() {
        let digit = match c {
            '0'..='9' => c as u32 - '0' as u32,
            '０'..='９' => c as u32 - '０' as u32,
            _ => return None,
        };
        value = value.checked_mul(10)?.checked_add(digit)?;
    }
    Some(value)
}

fn kanji_digit(c: char) -> Option<u32> {
    Some(match c {
        '〇' | '零' => 0,
        '一' | '壱' | '壹' => 1,
        '二' | '弐' | '貳' => 2,
        '三' | '参' | '參' => 3,
        '四' | '肆' => 4,
        '五' | '伍' => 5,
        '六' | '陸' => 6,
        '七' | '漆' => 7,
        '八' | '捌' => 8,
        '九' | '玖' => 9,
        _ => return None,
    })
}

fn kanji_unit(c: char) -> Option<u32> {
    Some(match c {
        '十' | '拾' => 10,
        '百' | '佰' => 100,
        '千' | '仟' => 1000,
        _ => return None,
    })
}

/// Kanji numerals such as `十二`, `二十一`, `百五`, or digit-by-digit `一〇`.
pub fn parse_kanji(token: &str) -> Option<u32> {
    let chars: Vec<char> = token.chars().collect();

    if chars.iter().all(|&c| kanji_digit(c).is_some()) {
        let mut value: u32 = 0;
        for &c in &chars {
            value = value.checked_mul(10)?.checked_add(kanji_digit(c)?)?;
        }
        return Some(value);
    }

    let mut total: u32 = 0;
    let mut pending: Option<u32> = None;
    for &c in &chars {
        if let Some(digit) = kanji_digit(c) {
            if pending.is_some() {
                return None;
            }
            pending = Some(digit);
        } else if let Some(unit) = kanji_unit(c) {
            total = total.checked_add(pending.unwrap_or(1).checked_mul(unit)?)?;
            pending = None;
        } else {
            return None;
        }
    }
    total.checked_add(pending.unwrap_or(0))
}

fn roman_value(c: char) -> Option<u32> {
    Some(match c.to_ascii_uppercase() {
        'I' => 1,
        'V' => 5,
        'X' => 10,
        'L' => 50,
        'C' => 100,
        'D' => 500,
        'M' => 1000,
        _ => return None,
    })
}

/// Roman numerals in one consistent case. Non-canonical forms (`IIII`,
/// `IC`) are rejected.
pub fn parse_roman(token: &str) -> Option<u32> {
    let upper = token.chars().all(|c| c.is_ascii_uppercase());
    let lower = token.chars().all(|c| c.is_ascii_lowercase());
    if !(upper || lower) {
        return None;
    }

    let values: Vec<u32> = token.chars().map(roman_value).collect::<Option<_>>()?;
    let mut total = 0;
    for (i, &value) in values.iter().enumerate() {
        match values.get(i + 1) {
            Some(&next) if next > value => total -= value as i64,
            _ => total += value as i64,
        }
    }
    let total = u32::try_from(total).ok().filter(|&t| t > 0)?;

    (to_roman(total).eq_ignore_ascii_case(token)).then_some(total)
}

fn to_roman(mut value: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (unit, symbol) in TABLE {
        while value >= unit {
            out.push_str(symbol);
            value -= unit;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arabic_digits() {
        assert_eq!(parse_numeral("12"), Some(12));
        assert_eq!(parse_numeral("１２"), Some(12));
        assert_eq!(parse_numeral("1a"), None);
    }

    #[test]
    fn test_kanji_numerals() {
        assert_eq!(parse_numeral("一"), Some(1));
        assert_eq!(parse_numeral("十"), Some(10));
        assert_eq!(parse_numeral("十二"), Some(12));
        assert_eq!(parse_numeral("二十一"), Some(21));
        assert_eq!(parse_numeral("百五"), Some(105));
        assert_eq!(parse_numeral("一〇"), Some(10));
        assert_eq!(parse_numeral("二二十"), None);
    }

    #[test]
    fn test_daiji() {
        assert_eq!(parse_numeral("壱"), Some(1));
        assert_eq!(parse_numeral("参"), Some(3));
        assert_eq!(parse_numeral("拾弐"), Some(12));
    }

    #[test]
    fn test_roman_numerals() {
        assert_eq!(parse_numeral("IV"), Some(4));
        assert_eq!(parse_numeral("xii"), Some(12));
        assert_eq!(parse_numeral("MCMXC"), Some(1990));
        assert_eq!(parse_roman("IIII"), None);
        assert_eq!(parse_roman("IC"), None);
        assert_eq!(parse_roman("Xi"), None);
    }
}
