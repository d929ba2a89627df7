//! English number words.
//!
//! British style, as used in place names: `1984` is
//! `one thousand, nine hundred and eighty-four` and `21` as an ordinal is
//! `twenty-first`.

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [&str; 7] = [
    "",
    "thousand",
    "million",
    "billion",
    "trillion",
    "quadrillion",
    "quintillion",
];

#[allow(clippy::cast_possible_truncation)]
fn below_hundred(n: u64) -> String {
    if n < 20 {
        return ONES[n as usize].to_string();
    }
    let tens = TENS[(n / 10) as usize];
    match n % 10 {
        0 => tens.to_string(),
        unit => format!("{tens}-{}", ONES[unit as usize]),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn below_thousand(n: u64) -> String {
    let hundreds = n / 100;
    let rest = n % 100;
    match (hundreds, rest) {
        (0, _) => below_hundred(rest),
        (h, 0) => format!("{} hundred", ONES[h as usize]),
        (h, r) => format!("{} hundred and {}", ONES[h as usize], below_hundred(r)),
    }
}

/// Cardinal words for `n`.
#[must_use]
pub fn cardinal(n: u64) -> String {
    if n < 1000 {
        return below_thousand(n);
    }

    let mut groups = Vec::new();
    let mut rest = n;
    while rest > 0 {
        groups.push(rest % 1000);
        rest /= 1000;
    }

    let mut parts: Vec<String> = Vec::new();
    for (scale, &group) in groups.iter().enumerate().rev() {
        if group == 0 {
            continue;
        }
        let words = below_thousand(group);
        if scale == 0 {
            parts.push(words);
        } else {
            parts.push(format!("{words} {}", SCALES[scale]));
        }
    }

    let lowest = groups[0];
    if lowest > 0 && lowest < 100 && parts.len() > 1 {
        let last = parts.pop().unwrap_or_default();
        format!("{} and {last}", parts.join(", "))
    } else {
        parts.join(", ")
    }
}

/// Ordinal words for `n`.
#[must_use]
pub fn ordinal(n: u64) -> String {
    let words = cardinal(n);
    let split = words.rfind([' ', '-']).map_or(0, |i| i + 1);
    let (head, last) = words.split_at(split);

    let last = match last {
        "one" => "first".to_string(),
        "two" => "second".to_string(),
        "three" => "third".to_string(),
        "five" => "fifth".to_string(),
        "eight" => "eighth".to_string(),
        "nine" => "ninth".to_string(),
        "twelve" => "twelfth".to_string(),
        w if w.ends_with('y') => format!("{}ieth", &w[..w.len() - 1]),
        w => format!("{w}th"),
    };

    format!("{head}{last}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_cardinals() {
        assert_eq!(cardinal(0), "zero");
        assert_eq!(cardinal(10), "ten");
        assert_eq!(cardinal(42), "forty-two");
        assert_eq!(cardinal(100), "one hundred");
        assert_eq!(cardinal(149), "one hundred and forty-nine");
    }

    #[test]
    fn large_cardinals() {
        assert_eq!(cardinal(1000), "one thousand");
        assert_eq!(cardinal(1005), "one thousand and five");
        assert_eq!(
            cardinal(1984),
            "one thousand, nine hundred and eighty-four"
        );
        assert_eq!(cardinal(2_000_000), "two million");
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal(1), "first");
        assert_eq!(ordinal(3), "third");
        assert_eq!(ordinal(5), "fifth");
        assert_eq!(ordinal(12), "twelfth");
        assert_eq!(ordinal(20), "twentieth");
        assert_eq!(ordinal(21), "twenty-first");
        assert_eq!(ordinal(149), "one hundred and forty-ninth");
    }
}
