// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Markdown rendering of marketing reports

use minijinja::Environment;
use serde::Serialize;

use crate::model::TokenUsage;
use crate::Result;

const TEMPLATE_NAME: &str = "marketing_report.md";

const MARKETING_TEMPLATE: &str = r#"# 📚 Book Marketing Content Report

**Book:** {{ book }}\
**Generated:** {{ generated }}\
**Model:** {{ model }}\
**Manuscript:** {{ words }} words{% if pages %}, {{ pages }} pages{% endif %}{% if truncated %} (first {{ content_chars }} characters used){% endif %}
{%- if usage %}\
**Tokens:** {{ usage.total_tokens }} ({{ usage.prompt_tokens }} prompt, {{ usage.output_tokens }} output)
{%- endif %}
{%- if failed_prompts %}\
**Failed prompts:** {{ failed_prompts }} of {{ sections | length }}
{%- endif %}

---

{% for section in sections -%}
## {{ section.number }}. Prompt {{ section.number }}

**Task:** {{ section.task }}

### Response:

{{ section.response }}

---

{% endfor -%}
## 💡 Note on File Format

This report is in **Markdown (.md)** format. You can open it with any text editor or word processor. For a formatted Word document, open the file and use 'File > Save As' to save it as a '.docx' file. Headings, bold text and lists are preserved.
"#;

/// Answer (or error text) for one marketing prompt
#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub number: usize,
    pub task: String,
    pub response: String,
    pub failed: bool,
}

/// Everything shown in a marketing report
#[derive(Debug, Clone, Serialize)]
pub struct MarketingReport {
    pub book: String,
    pub generated: String,
    pub model: String,
    pub words: usize,
    pub pages: Option<usize>,
    pub truncated: bool,
    pub content_chars: usize,
    pub usage: Option<TokenUsage>,
    pub failed_prompts: usize,
    pub sections: Vec<ReportSection>,
}

impl MarketingReport {
    /// Render the report as Markdown
    pub fn render(&self) -> Result<String> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, MARKETING_TEMPLATE)?;
        let rendered = env.get_template(TEMPLATE_NAME)?.render(self)?;
        Ok(rendered)
    }
}
