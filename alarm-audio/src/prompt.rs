//! Rendering of the briefing request sent to the language model.

use std::fmt::Write;

use crate::repository::{Alarm, DailyContent, UserPreferences, WeatherData};

/// Everything known about the listener when the script is written.
#[derive(Debug, Clone)]
pub struct BriefingContext {
    pub alarm: Alarm,
    pub preferences: Option<UserPreferences>,
    pub weather: Option<WeatherData>,
    pub content: Option<DailyContent>,
    pub categories: Vec<String>,
}

/// The user's news categories with `general` first. Defaults to
/// `["general"]`.
pub fn ordered_categories(preferences: Option<&UserPreferences>) -> Vec<String> {
    let requested: Vec<String> = preferences
        .and_then(|p| p.news_categories.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    if requested.is_empty() {
        return vec!["general".to_string()];
    }

    let mut ordered = Vec::with_capacity(requested.len());
    if requested.iter().any(|c| c == "general") {
        ordered.push("general".to_string());
    }
    for category in requested {
        if !ordered.contains(&category) {
            ordered.push(category);
        }
    }
    ordered
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn weather_section(weather: Option<&WeatherData>) -> String {
    let Some(weather) = weather else {
        return "**Weather:** No weather data available.".to_string();
    };

    let mut forecast = String::new();
    match (weather.high_temp, weather.low_temp, weather.current_temp) {
        (Some(high), Some(_), Some(current)) => {
            let _ = write!(forecast, "High of {:.0}°F, currently {:.0}°F", high, current);
        }
        (Some(high), Some(_), None) => {
            let _ = write!(forecast, "High of {:.0}°F", high);
        }
        (_, _, Some(current)) => {
            let _ = write!(forecast, "Currently {:.0}°F", current);
        }
        _ => {}
    }
    if let Some(condition) = &weather.condition {
        let _ = write!(forecast, ", {}", condition.to_lowercase());
    }

    format!(
        "**Weather for {}:**\n- Forecast: {}\n- Sunrise: {}\n- Sunset: {}",
        weather.location.as_deref().unwrap_or("your area"),
        forecast.trim_start_matches(", "),
        weather.sunrise_time.as_deref().unwrap_or("Not available"),
        weather.sunset_time.as_deref().unwrap_or("Not available"),
    )
}

fn content_section(content: Option<&DailyContent>, categories: &[String]) -> String {
    let Some(content) = content else {
        return "No daily content available.".to_string();
    };

    categories
        .iter()
        .map(|category| {
            format!(
                "**{} News:**\n- Headline: {}\n- Sports: {}\n- Stocks: {}\n- Holidays: {}",
                title_case(category),
                content.headline(category).unwrap_or("No news available"),
                content.sports_summary().unwrap_or("No sports available"),
                content.stocks_summary().unwrap_or("No market data available"),
                content.holidays().unwrap_or("No holidays today"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render the user prompt for one alarm.
pub fn render_prompt(ctx: &BriefingContext) -> String {
    let mut prompt = String::from("Create a personalized morning message using the following inputs.\n\n");

    if let Some(date) = ctx.alarm.alarm_date {
        let _ = writeln!(prompt, "**Alarm Date:** Today is {}.", date.format("%A, %B %-d, %Y"));
    }
    if let Some(time) = ctx.alarm.alarm_time_local {
        let _ = writeln!(
            prompt,
            "**Alarm Time:** {} {}",
            time.format("%-I:%M %p"),
            ctx.alarm.alarm_timezone.as_deref().unwrap_or("")
        );
    }

    let _ = write!(
        prompt,
        "\n{}\n\n{}\n\n",
        weather_section(ctx.weather.as_ref()),
        content_section(ctx.content.as_ref(), &ctx.categories)
    );

    match &ctx.preferences {
        Some(prefs) => {
            let _ = write!(
                prompt,
                "**User Preferences:**\n- Name: {}\n- News Categories: {}\n- Sports Team: {}\n- Stocks: {}\n- Content Duration: 300 seconds",
                prefs.preferred_name.as_deref().unwrap_or("there"),
                ctx.categories.join(", "),
                prefs.sports_team.as_deref().unwrap_or("none specified"),
                prefs
                    .stocks
                    .as_ref()
                    .filter(|s| !s.is_empty())
                    .map(|s| s.join(", "))
                    .unwrap_or_else(|| "none specified".to_string()),
            );
        }
        None => prompt.push_str("No user preferences available."),
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;
    use uuid::Uuid;

    fn alarm() -> Alarm {
        Alarm {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            alarm_date: NaiveDate::from_ymd_opt(2025, 3, 3),
            alarm_time_local: NaiveTime::from_hms_opt(6, 45, 0),
            alarm_timezone: Some("America/Chicago".to_string()),
            next_trigger_at: None,
            active: true,
        }
    }

    fn prefs(categories: &[&str]) -> UserPreferences {
        UserPreferences {
            news_categories: Some(categories.iter().map(|c| c.to_string()).collect()),
            preferred_name: Some("Sam".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn general_comes_first() {
        let ordered = ordered_categories(Some(&prefs(&["technology", "General", "sports"])));
        assert_eq!(ordered, vec!["general", "technology", "sports"]);
    }

    #[test]
    fn categories_default_to_general() {
        assert_eq!(ordered_categories(None), vec!["general"]);
        assert_eq!(ordered_categories(Some(&prefs(&[]))), vec!["general"]);
        assert_eq!(ordered_categories(Some(&prefs(&["business"]))), vec!["business"]);
    }

    #[test]
    fn prompt_includes_available_inputs() {
        let content = match json!({"general_headlines": "Bridge reopens downtown"}) {
            serde_json::Value::Object(columns) => DailyContent::from_columns(columns),
            _ => unreachable!(),
        };
        let ctx = BriefingContext {
            alarm: alarm(),
            preferences: Some(prefs(&["general"])),
            weather: Some(WeatherData {
                location: Some("Austin".to_string()),
                high_temp: Some(81.0),
                low_temp: Some(60.0),
                current_temp: Some(64.4),
                condition: Some("Partly Cloudy".to_string()),
                ..Default::default()
            }),
            content: Some(content),
            categories: vec!["general".to_string()],
        };

        let prompt = render_prompt(&ctx);
        assert!(prompt.contains("Today is Monday, March 3, 2025."));
        assert!(prompt.contains("6:45 AM"));
        assert!(prompt.contains("High of 81°F, currently 64°F, partly cloudy"));
        assert!(prompt.contains("Headline: Bridge reopens downtown"));
        assert!(prompt.contains("Name: Sam"));
    }

    #[test]
    fn prompt_notes_missing_inputs() {
        let ctx = BriefingContext {
            alarm: alarm(),
            preferences: None,
            weather: None,
            content: None,
            categories: vec!["general".to_string()],
        };

        let prompt = render_prompt(&ctx);
        assert!(prompt.contains("No weather data available."));
        assert!(prompt.contains("No daily content available."));
        assert!(prompt.contains("No user preferences available."));
    }
}
