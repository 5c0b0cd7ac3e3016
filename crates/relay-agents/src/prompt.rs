//! Prompt text handed to the agent, and the summary it is asked to print back.

use relay_core::IssueRef;

pub const SUMMARY_START: &str = "=== DEVELOPMENT SUMMARY ===";
pub const SUMMARY_END: &str = "=== END SUMMARY ===";

/// Summaries shorter than this are treated as missing.
pub const MIN_SUMMARY_CHARS: usize = 50;

pub fn build_prompt(issue: &IssueRef, branch_name: &str) -> String {
    let body = if issue.body.trim().is_empty() {
        "(no description provided)"
    } else {
        issue.body.trim()
    };

    format!(
        "You are working on GitHub issue #{number}: {title}\n\
         Issue URL: {url}\n\
         Branch: {branch_name} (already checked out)\n\
         \n\
         Issue description:\n\
         {body}\n\
         \n\
         Work plan:\n\
         1. Read the relevant code and understand the request.\n\
         2. Implement the change, following the existing code style.\n\
         3. Run the project's tests if it has any and fix what you break.\n\
         4. Leave your changes in the working tree. Committing, pushing and\n\
         opening the pull request happen automatically after you exit.\n\
         \n\
         When you are done, print a summary for the pull request description\n\
         between these exact marker lines:\n\
         \n\
         {SUMMARY_START}\n\
         ## Overview\n\
         ## Files changed\n\
         ## Approach\n\
         ## Testing\n\
         ## Risks\n\
         {SUMMARY_END}\n",
        number = issue.number,
        title = issue.title,
        url = issue.html_url,
    )
}

/// Pull the text between the summary markers out of agent output.
///
/// The last complete block wins, since agents sometimes echo the prompt.
pub fn extract_development_summary(output: &str) -> Option<String> {
    let start = output.rfind(SUMMARY_START)?;
    let after_start = &output[start + SUMMARY_START.len()..];
    let end = after_start.find(SUMMARY_END)?;
    let summary = after_start[..end].trim();

    if summary.chars().count() < MIN_SUMMARY_CHARS {
        return None;
    }
    Some(summary.to_string())
}
