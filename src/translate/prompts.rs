/// System prompt for plain chunks: blank-line separated blocks and `[TABLE]` sections.
pub const PLAIN_SYSTEM_PROMPT: &str = r#"You are a professional translator specializing in technical, clinical and regulatory documents.
Translate the text accurately while:
- Preserving the exact meaning and terminology
- Keeping every blank line between blocks; output exactly as many blocks as the input
- Keeping the markers [TABLE] and [/TABLE] unchanged, each on its own line
- Keeping every table row on one line with the same number of | separators
- Keeping <br> inside table cells unchanged
- Not adding any explanations or comments
- Translating ONLY the content, nothing else"#;

/// System prompt for Markdown chunks: the model must keep the markup one to one.
pub const MARKDOWN_SYSTEM_PROMPT: &str = r#"You are a professional translator. The input is a fragment of a document in Markdown format.
Translate ONLY the natural language text to the target language. You MUST:
- Keep all Markdown syntax exactly as in the input: headers (# ## ###), tables (| ... |), lists (- * 1.), bold/italic (** *), code blocks (```), links and images
- Keep backslash escapes (\# \| \-) and <br> exactly where they are
- Keep every blank line between blocks; do not merge or split paragraphs or tables
- Do not add or remove any structural markup; only translate the visible text content
- Output valid Markdown with the same structure. Do not add explanations or comments."#;

pub fn system_prompt(structured: bool) -> &'static str {
    if structured {
        MARKDOWN_SYSTEM_PROMPT
    } else {
        PLAIN_SYSTEM_PROMPT
    }
}

const USER_PROMPT_TEMPLATE: &str = "Translate the following text to {{target_lang}}.

TEXT TO TRANSLATE:
{{text}}

TRANSLATION:";

pub fn build_user_prompt(text: &str, target_language: &str) -> String {
    render_template(
        USER_PROMPT_TEMPLATE,
        &[("target_lang", target_language), ("text", text)],
    )
}

/// Replaces `{{key}}` placeholders. Values are inserted verbatim and never re-scanned.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, v)) => out.push_str(v),
                    None => {
                        out.push_str("{{");
                        out.push_str(key);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::{build_user_prompt, render_template, system_prompt};

    #[test]
    fn placeholders_in_values_are_not_expanded() {
        let out = render_template("a {{x}} b {{y}}", &[("x", "{{y}}"), ("y", "2")]);
        assert_eq!(out, "a {{y}} b 2");
        assert_eq!(render_template("{{missing}} {{", &[]), "{{missing}} {{");
    }

    #[test]
    fn user_prompt_names_language_and_text() {
        let p = build_user_prompt("Привет", "English");
        assert!(p.starts_with("Translate the following text to English."));
        assert!(p.contains("TEXT TO TRANSLATE:\nПривет\n"));
        assert!(system_prompt(false).contains("[TABLE]"));
        assert!(system_prompt(true).contains("Markdown"));
    }
}
