use auditor_core::traits::ReasoningRequest;

pub const SYSTEM_PROMPT: &str = "\
You are a strict compliance auditor. Judge the INPUT only against the POLICY RULES supplied \
in the message; do not rely on rules you remember from elsewhere.\n\
Decide one outcome:\n\
- FAIL if the input violates at least one supplied rule,\n\
- PASS if it violates none of them,\n\
- UNCERTAIN if the supplied rules are insufficient to decide.\n\
Only use rule ids that appear in the supplied rules. Cite the chunk ids (the second field of \
each rule header) that support your decision.\n\
Reply with a single JSON object and nothing else:\n\
{\"outcome\": \"PASS|FAIL|UNCERTAIN\", \"violated_rule_ids\": [\"<rule id>\"], \
\"rationale\": \"<short explanation>\", \"citations\": [\"<chunk id>\"], \"confidence\": <0.0-1.0>}";

const FORMAT_ONLY_PROMPT: &str = "\
Your previous reply could not be used. Return ONLY one JSON object with exactly these keys: \
outcome (\"PASS\", \"FAIL\" or \"UNCERTAIN\"), violated_rule_ids (array of strings), \
rationale (non-empty string), citations (array of chunk ids), confidence (number between 0 and 1). \
No prose, no markdown, no code fences.";

pub fn judgment_request(user: &str) -> ReasoningRequest {
    ReasoningRequest { system: SYSTEM_PROMPT.to_string(), user: user.to_string(), json_mode: true }
}

/// Re-prompt that asks for the same judgment with attention on the output
/// format only.
pub fn format_only_request(user: &str, problem: &str) -> ReasoningRequest {
    ReasoningRequest {
        system: format!("{}\n\n{}", SYSTEM_PROMPT, FORMAT_ONLY_PROMPT),
        user: format!("{}\nThe previous reply was rejected: {}\n", user, problem),
        json_mode: true,
    }
}
