//! Contract dates and file names.

use chrono::{Datelike, NaiveDate};

const GENITIVE_MONTHS: [&str; 12] = [
    "января",
    "февраля",
    "марта",
    "апреля",
    "мая",
    "июня",
    "июля",
    "августа",
    "сентября",
    "октября",
    "ноября",
    "декабря",
];

/// Long-form Russian contract date, e.g. `«23» сентября 2025 г.`
pub fn contract_date(date: NaiveDate) -> String {
    // month0() is always 0..=11
    let month = GENITIVE_MONTHS[date.month0() as usize];
    format!("«{:02}» {} {} г.", date.day(), month, date.year())
}

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' | 'ы' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' | 'ь' => "",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    })
}

/// Lowercase ASCII slug joined by `separator`.
///
/// Cyrillic is transliterated, other letters and digits are kept when ASCII,
/// everything else collapses into a single separator.
pub fn slugify(input: &str, separator: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;

    for c in input.chars().flat_map(char::to_lowercase) {
        let piece: Option<std::borrow::Cow<'static, str>> = if c.is_ascii_alphanumeric() {
            Some(c.to_string().into())
        } else {
            transliterate(c).map(Into::into)
        };

        match piece {
            Some(p) if p.is_empty() => {}
            Some(p) => {
                if pending_sep && !out.is_empty() {
                    out.push(separator);
                }
                pending_sep = false;
                out.push_str(&p);
            }
            None => pending_sep = true,
        }
    }
    out
}

/// `{slug}_{contract_number}`, with `contract` standing in for an empty slug.
pub fn contract_filename(client_full_name: &str, contract_number: &str) -> String {
    let slug = slugify(client_full_name, '_');
    let slug = if slug.is_empty() { "contract".to_string() } else { slug };
    format!("{}_{}", slug, contract_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_russian_date() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 3).unwrap();
        assert_eq!(contract_date(date), "«03» сентября 2025 г.");
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(contract_date(date), "«31» января 2026 г.");
    }

    #[test]
    fn slugifies_cyrillic_names() {
        assert_eq!(slugify("Иванов Иван Иванович", '_'), "ivanov_ivan_ivanovich");
        assert_eq!(slugify("Щукин-Съёмов", '_'), "shchukin_semov");
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slugify("  John   O'Brien!! ", '_'), "john_o_brien");
        assert_eq!(slugify("***", '_'), "");
    }

    #[test]
    fn filename_falls_back_to_contract() {
        assert_eq!(contract_filename("!!!", "20250923-001"), "contract_20250923-001");
        assert_eq!(
            contract_filename("Петров Пётр", "20250923-002"),
            "petrov_petr_20250923-002"
        );
    }
}
