//! Embedded scaffold templates.
//!
//! Templates are baked into the binary so generation never depends on files
//! next to the executable. Placeholders use `{{key}}` and are substituted in a
//! single pass, so substituted values are never re-expanded.

/// Embed template files at compile time as public text constants.
macro_rules! embedded_templates {
    ($($path:expr => $const_name:ident),* $(,)?) => {
        $(
            pub const $const_name: &str =
                include_str!(concat!("../../templates/", $path));
        )*
    };
}

embedded_templates! {
    "handler.sh" => TEMPLATE_HANDLER,
    "README_PLUGIN.md" => TEMPLATE_README,
    "healthcheck.md" => TEMPLATE_HEALTHCHECK,
}

/// Substitute `{{key}}` placeholders. Unknown keys are left untouched.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = &after[..end];
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
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
