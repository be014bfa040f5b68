use std::fmt::Write;

use crate::events::VideoEnvelope;
use crate::ipconfig::IpConfig;

/// Builds the multi-IP analysis prompt: video facts, one section per
/// matched property, the legal framework, and the exact output schema the
/// response parser validates against.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, video: &VideoEnvelope, configs: &[IpConfig]) -> String {
        let mut sections = String::new();
        for config in configs {
            let mut characters = config
                .characters
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            if config.characters.len() > 10 {
                let _ = write!(characters, ", ... ({} total)", config.characters.len());
            }
            let _ = write!(
                sections,
                "\n### {} ({})\n**Characters**: {}\n**Visual markers**: {}\n**AI patterns**: {}\n",
                config.name,
                config.owner,
                characters,
                config.visual_markers.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
                config.ai_tool_patterns.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
            );
        }

        format!(
            r#"# MULTI-IP COPYRIGHT INFRINGEMENT ANALYSIS

You are a copyright analysis expert evaluating this video for potential infringement of MULTIPLE intellectual properties.

## VIDEO INFORMATION

- **Video ID**: {video_id}
- **Title**: {title}
- **Channel**: {channel}
- **Duration**: {duration} seconds
- **View Count**: {views}

## INTELLECTUAL PROPERTIES TO CHECK

This video may contain characters from multiple IPs. Analyze EACH IP separately:
{sections}

## LEGAL FRAMEWORK

### Fair Use Doctrine (17 U.S.C. § 107)

Many uses are LEGITIMATE and NOT infringement: personal use and cosplay,
licensed merchandise reviews, commentary and criticism, educational content,
news and documentary coverage. Fair use applies when the purpose is
transformative, the use is minimal, and the market for the original is not
harmed.

### AI-Generated Content

AI tools do NOT grant copyright permissions. AI-generated character content
is an unauthorized derivative work; full AI movies or episodes carry high
infringement risk, and length matters.

## RECOMMENDED ACTIONS

- **immediate_takedown**: clear infringement with high commercial impact —
  full episodes or movies, lengthy monetized AI narratives, unauthorized
  merchandise promotion, content farms.
- **tolerated**: technically infringing but culturally accepted — fan
  cosplay, amateur fan art and tribute videos, low-budget fan films.
  Still worth monitoring; fan creators may escalate to commercial use.
- **safe_harbor**: protected fair use — reviews and commentary, educational
  breakdowns, parody, news coverage, unboxing of licensed products.
- **monitor**: unclear or borderline — ambiguous licensing, partial
  transformation, tolerated content gaining rapid traction.
- **ignore**: no infringement — original content, official uploads, generic
  concepts, name-only mentions.

## ANALYSIS INSTRUCTIONS

For EACH IP that appears in the video: identify characters, detect AI
generation (tools, artifacts, watermarks), assess infringement considering
fair use, and provide detailed reasoning with timestamps.

## REQUIRED OUTPUT FORMAT

Respond with ONLY valid JSON matching this schema:

{{
  "ip_results": [
    {{
      "ip_id": "string",
      "ip_name": "string",
      "contains_infringement": "boolean",
      "characters_detected": [
        {{
          "name": "string",
          "screen_time_seconds": "number",
          "prominence": "string - primary|secondary|background",
          "timestamps": ["array of strings - MM:SS format"],
          "description": "string"
        }}
      ],
      "is_ai_generated": "boolean",
      "ai_tools_detected": ["array of strings"],
      "fair_use_applies": "boolean",
      "fair_use_reasoning": "string",
      "content_type": "string - full_movie|trailer|clips|review|cosplay|toys|news|tutorial|gameplay|other",
      "infringement_likelihood": "number 0-100",
      "reasoning": "string",
      "recommended_action": "string - immediate_takedown|tolerated|monitor|safe_harbor|ignore"
    }}
  ],
  "overall_recommendation": "string - immediate_takedown|tolerated|monitor|safe_harbor|ignore",
  "overall_notes": "string"
}}

Now analyze the provided video for ALL listed IPs and respond with ONLY the JSON output.
"#,
            video_id = video.video_id,
            title = video.title,
            channel = video.channel_title,
            duration = video.duration_seconds,
            views = video.view_count,
            sections = sections,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipconfig::IpPriority;
    use crate::video::PriorityTier;
    use chrono::Utc;

    #[test]
    fn prompt_names_every_config() {
        let video = VideoEnvelope {
            video_id: "abc".into(),
            url: "https://youtube.com/watch?v=abc".into(),
            title: "Test".into(),
            duration_seconds: 300,
            view_count: 1_000,
            channel_id: "c".into(),
            channel_title: "Channel".into(),
            risk_score: 50,
            risk_tier: PriorityTier::Medium,
            matched_ips: vec!["a".into(), "b".into()],
            discovered_at: Utc::now(),
            scan_priority: 50,
        };
        let configs = vec![
            IpConfig {
                ip_id: "a".into(),
                name: "Alpha Heroes".into(),
                owner: "Alpha Studio".into(),
                priority: IpPriority::High,
                characters: vec!["Alphaman".into()],
                visual_markers: vec!["red cape".into()],
                ai_tool_patterns: vec![],
                false_positive_filters: vec![],
                keywords_high: vec![],
                keywords_medium: vec![],
                keywords_low: vec![],
                enabled: true,
                deleted: false,
            },
            IpConfig {
                ip_id: "b".into(),
                name: "Beta Saga".into(),
                owner: "Beta Films".into(),
                priority: IpPriority::Medium,
                characters: vec![],
                visual_markers: vec![],
                ai_tool_patterns: vec![],
                false_positive_filters: vec![],
                keywords_high: vec![],
                keywords_medium: vec![],
                keywords_low: vec![],
                enabled: true,
                deleted: false,
            },
        ];
        let prompt = PromptBuilder::new().build(&video, &configs);
        assert!(prompt.contains("Alpha Heroes"));
        assert!(prompt.contains("Beta Saga"));
        assert!(prompt.contains("immediate_takedown"));
        assert!(prompt.contains("ONLY the JSON output"));
    }
}
