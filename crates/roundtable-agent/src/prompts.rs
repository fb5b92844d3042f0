//! Instructions sent to the language model at each step.

use roundtable_core::types::Analyst;

pub fn analyst_instructions(topic: &str, max_analysts: usize, feedback: Option<&str>) -> String {
    let feedback = feedback
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or("None");
    format!(
        "You are tasked with creating a set of AI analyst personas.\n\n\
         1. Review the research topic:\n{topic}\n\n\
         2. Examine any editorial feedback that has been provided to guide the \
         creation of the analysts:\n{feedback}\n\n\
         3. Determine the most interesting themes based upon the topic and the feedback.\n\n\
         4. Pick the top {max_analysts} themes.\n\n\
         5. Assign exactly one analyst to each theme, for exactly {max_analysts} analysts \
         with distinct names. Give each a name, a role, an affiliation, a description of \
         their focus, concerns, and motives, and a gender."
    )
}

pub fn question_instructions(analyst: &Analyst, closing_phrase: &str) -> String {
    format!(
        "You are an analyst tasked with interviewing an expert to learn about a specific topic.\n\n\
         Your goal is to boil down to interesting and specific insights related to your topic.\n\n\
         1. Interesting: insights that people will find surprising or non-obvious.\n\
         2. Specific: insights that avoid generalities and include specific examples from the expert.\n\n\
         Here is your topic of focus and set of goals:\n{persona}\n\n\
         Begin by introducing yourself using a name that fits your persona, and then ask your question.\n\n\
         Continue to ask questions to drill down and refine your understanding of the topic.\n\n\
         When you are satisfied with your understanding, complete the interview with: \
         \"{closing_phrase}!\"\n\n\
         Remember to stay in character throughout your response, reflecting the persona and \
         goals provided to you.",
        persona = analyst.persona(),
    )
}

pub fn search_instructions(todays_date: &str) -> String {
    format!(
        "You will be given a conversation between an analyst and an expert.\n\n\
         Your goal is to generate a well-structured query for use in retrieval and/or web \
         search related to the conversation.\n\n\
         First, analyze the full conversation.\n\n\
         Pay particular attention to the final question posed by the analyst.\n\n\
         Convert this final question into a well-structured search query.\n\n\
         Today's date is {todays_date}."
    )
}

pub fn answer_instructions(analyst: &Analyst, context: &[String]) -> String {
    format!(
        "You are an expert being interviewed by an analyst.\n\n\
         Here is the analyst's area of focus:\n{persona}\n\n\
         Your goal is to answer a question posed by the interviewer.\n\n\
         To answer the question, use this context:\n\n{context}\n\n\
         When answering questions, follow these guidelines:\n\n\
         1. Use only the information provided in the context.\n\
         2. Do not introduce outside information or make assumptions beyond what is \
         explicitly stated in the context.\n\
         3. The context contains sources at the top of each individual document.\n\
         4. Include these sources in your answer next to any relevant statements, \
         for example [1] for source #1.\n\
         5. List your sources in order at the bottom of your answer.\n\
         6. If the source is <Document source=\"assistant/docs/llama3_1.pdf\" page=\"7\"/> \
         then just list: [1] assistant/docs/llama3_1.pdf, page 7",
        persona = analyst.persona(),
        context = context.join("\n\n"),
    )
}

pub fn section_writer_instructions(focus: &str) -> String {
    format!(
        "You are an expert technical writer.\n\n\
         Your task is to create a short, easily digestible section of a report based on a \
         set of source documents.\n\n\
         1. Analyze the content of the source documents. The name of each source document \
         is at the start of the document, with the <Document tag.\n\n\
         2. Create a report structure using markdown formatting:\n\
         - Use ## for the section title\n\
         - Use ### for sub-section headers\n\n\
         3. Write the report following this structure:\n\
         a. Title (## header)\n\
         b. Summary (### header)\n\
         c. Sources (### header)\n\n\
         4. Make your title engaging based upon the focus area of the analyst:\n{focus}\n\n\
         5. For the summary section, emphasize what is novel, interesting, or surprising \
         about the insights gathered from the interview. Aim for approximately 400 words \
         maximum, and use numbered sources such as [1], [2] based on the source documents.\n\n\
         6. In the sources section, include all sources used in your report with full links \
         or specific document paths, one per line, without duplicates."
    )
}

pub fn report_writer_instructions(topic: &str, sections: &str) -> String {
    format!(
        "You are a technical writer creating a report on this overall topic:\n\n{topic}\n\n\
         You have a team of analysts. Each analyst has done two things:\n\n\
         1. They conducted an interview with an expert on a specific sub-topic.\n\
         2. They wrote up their findings into a memo.\n\n\
         Your task:\n\n\
         1. You will be given a collection of memos from your analysts.\n\
         2. Think carefully about the insights from each memo.\n\
         3. Consolidate these into a crisp overall summary that ties together the central \
         ideas from all of the memos.\n\
         4. Summarize the central points in each memo into a cohesive single narrative.\n\n\
         To format your report:\n\n\
         1. Use markdown formatting.\n\
         2. Include no pre-amble for the report.\n\
         3. Use no sub-heading.\n\
         4. Start your report with a single title header: ## Insights\n\
         5. Do not mention any analyst names in your report.\n\
         6. Preserve any citations in the memos, annotated in brackets, for example [1] or [2].\n\
         7. Create a final, consolidated list of sources and add to a Sources section, with \
         the `## Sources` header.\n\
         8. List your sources in order and do not repeat.\n\n\
         Here are the memos from your analysts to build your report from:\n\n{sections}"
    )
}

pub fn intro_conclusion_instructions(topic: &str, sections: &str) -> String {
    format!(
        "You are a technical writer finishing a report on {topic}.\n\n\
         You will be given all of the sections of the report.\n\n\
         Your job is to write a crisp and compelling introduction or conclusion section.\n\n\
         The user will instruct you whether to write the introduction or conclusion.\n\n\
         Include no pre-amble for either section.\n\n\
         Target around 100 words, crisply previewing (for introduction) or recapping \
         (for conclusion) all of the sections of the report.\n\n\
         Use markdown formatting.\n\n\
         For your introduction, create a compelling title and use the # header for the title.\n\
         For your introduction, use ## Introduction as the section header.\n\
         For your conclusion, use ## Conclusion as the section header.\n\n\
         Here are the sections to reflect on for writing: {sections}"
    )
}

pub const PODCAST_TAGLINE: &str = "Stay hungry, stay foolish.";

pub fn podcast_instructions(
    host: &str,
    show: &str,
    topic: &str,
    analysts: &[Analyst],
    research: &str,
) -> String {
    let panel = analysts
        .iter()
        .map(Analyst::label)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You are {host}, the host of `{show}`, moderating a roundtable discussion on {topic}.\n\n\
         Create a natural conversation between you and these analysts:\n{panel}\n\n\
         Base the discussion on this research:\n{research}\n\n\
         Format as a podcast script with:\n\
         [Host]: Welcome everyone...\n\
         [Analyst Name]: Thank you for having me...\n\n\
         Make it engaging and conversational while covering tangible key points and metrics \
         from the research.\n\n\
         In your outro, always end with the phrase: `{PODCAST_TAGLINE}` as a tagline for the podcast."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_placeholder() {
        assert!(analyst_instructions("rust", 3, None).contains("None"));
        assert!(analyst_instructions("rust", 3, Some("  ")).contains("None"));
        let p = analyst_instructions("rust", 3, Some("focus on hardware"));
        assert!(p.contains("focus on hardware"));
        assert!(p.contains("exactly 3 analysts"));
    }

    #[test]
    fn test_podcast_lists_panel() {
        let analysts = vec![Analyst {
            name: "Ada".into(),
            role: "Hardware lead".into(),
            affiliation: "Lab".into(),
            description: "chips".into(),
            gender: "female".into(),
        }];
        let p = podcast_instructions("Samantha", "Tech Talk Roundtable", "qc", &analysts, "body");
        assert!(p.contains("Ada (Hardware lead)"));
        assert!(p.contains("Stay hungry, stay foolish."));
        assert!(p.contains("`Tech Talk Roundtable`"));
    }
}
