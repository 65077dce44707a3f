//! Domain-specific vocabulary priming prompts
//!
//! Passed to the recognition engine as an initial prompt to bias decoding
//! toward domain vocabulary. Unknown domains get no priming.

/// Get the vocabulary prompt for a domain.
pub fn domain_prompt(domain: &str) -> &'static str {
    match domain.to_ascii_lowercase().as_str() {
        "sports" => {
            "Sports commentary: score, goal, touchdown, field goal, three-pointer, \
             slam dunk, home run, strikeout, penalty, foul, timeout, halftime, \
             overtime, championship, playoffs, finals, MVP, all-star, coach, referee."
        }
        "football" => {
            "NFL football: touchdown, field goal, extra point, two-point conversion, \
             quarterback, running back, wide receiver, tight end, offensive line, \
             defensive line, linebacker, cornerback, safety, interception, fumble, \
             sack, blitz, red zone, end zone, first down, fourth down, punt, kickoff. \
             Patrick Mahomes, Travis Kelce, Chiefs, Eagles, Cowboys, 49ers, Ravens."
        }
        "basketball" => {
            "NBA basketball: three-pointer, slam dunk, layup, free throw, rebound, \
             assist, steal, block, turnover, fast break, pick and roll, alley-oop, \
             court, paint, key, arc, baseline, backcourt. \
             LeBron James, Stephen Curry, Kevin Durant, Lakers, Warriors, Celtics."
        }
        "news" => {
            "News broadcast: breaking news, developing story, sources confirm, \
             according to officials, press conference, statement, investigation, \
             legislation, policy, economy, inflation, markets, weather forecast."
        }
        "interview" => {
            "Interview conversation: Thank you for joining us. Tell us about. \
             How would you describe. What's your perspective on. \
             That's a great question. Absolutely. Definitely. I think. \
             In my experience. Looking forward."
        }
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_domains_have_prompts() {
        for domain in ["sports", "football", "basketball", "news", "interview"] {
            assert!(!domain_prompt(domain).is_empty(), "{domain} prompt missing");
        }
    }

    #[test]
    fn test_general_and_unknown_are_empty() {
        assert_eq!(domain_prompt("general"), "");
        assert_eq!(domain_prompt("cooking"), "");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(domain_prompt("Football"), domain_prompt("football"));
    }
}
