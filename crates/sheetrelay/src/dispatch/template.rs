//! Subject and body templates for outgoing messages.

/// Values substituted into `{group_id}`, `{group_name}`, `{sender}` and
/// `{filename}`.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub group_id: &'a str,
    pub group_name: &'a str,
    pub sender: &'a str,
    pub filename: &'a str,
}

/// Replaces known placeholders; unknown `{...}` text is left as is.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    template
        .replace("{group_id}", vars.group_id)
        .replace("{group_name}", vars.group_name)
        .replace("{sender}", vars.sender)
        .replace("{filename}", vars.filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let vars = TemplateVars {
            group_id: "GRUP_1",
            group_name: "Antalya",
            sender: "reports@partner.example",
            filename: "orders.xlsx",
        };
        assert_eq!(
            render("{group_id} ({group_name}) from {sender}: {filename} {other}", &vars),
            "GRUP_1 (Antalya) from reports@partner.example: orders.xlsx {other}"
        );
    }
}
