//! Korean question -> English prompt mapping for the vision model.

pub const DEFAULT_SUBJECT: &str = "it";
pub const DEFAULT_PROMPT: &str = "Describe this landscape scene.";
pub const DETAILED_SCENE_PROMPT: &str = "Describe this landscape scene in detail.";

/// Scene subjects. The first entry contained in the question wins, so order matters.
pub const SUBJECT_TERMS: &[(&str, &str)] = &[
    // nature
    ("산", "the mountain"),
    ("산이", "the mountain"),
    ("바다", "the ocean"),
    ("바다가", "the ocean"),
    ("호수", "the lake"),
    ("호수가", "the lake"),
    ("강", "the river"),
    ("강이", "the river"),
    ("하늘", "the sky"),
    ("하늘이", "the sky"),
    ("구름", "the clouds"),
    ("구름이", "the clouds"),
    ("나무", "the trees"),
    ("나무가", "the trees"),
    ("숲", "the forest"),
    ("숲이", "the forest"),
    ("꽃", "the flowers"),
    ("꽃이", "the flowers"),
    ("해", "the sun"),
    ("해가", "the sun"),
    ("달", "the moon"),
    ("달이", "the moon"),
    ("별", "the stars"),
    ("별이", "the stars"),
    ("눈", "the snow"),
    ("비", "the rain"),
    ("안개", "the fog"),
    ("노을", "the sunset"),
    ("일출", "the sunrise"),
    // terrain
    ("언덕", "the hill"),
    ("절벽", "the cliff"),
    ("해변", "the beach"),
    ("모래", "the sand"),
    ("바위", "the rocks"),
    ("폭포", "the waterfall"),
    ("들판", "the field"),
    ("초원", "the meadow"),
    // man-made
    ("건물", "the building"),
    ("집", "the house"),
    ("다리", "the bridge"),
    ("길", "the road"),
    ("배", "the boat"),
    ("등대", "the lighthouse"),
];

/// Question-type fragments and their English templates. `{subject}` is substituted.
pub const QUESTION_PATTERNS: &[(&str, &str)] = &[
    // whole scene
    ("뭐가 있어", "Describe this landscape scene."),
    ("뭐가 보여", "Describe this landscape scene."),
    ("앞에 뭐", "What is in the foreground?"),
    ("뭐 있어", "Describe this scene."),
    ("설명해", "Describe this landscape in detail."),
    // position
    ("앞쪽", "What is in the foreground?"),
    ("뒤쪽", "What is in the background?"),
    ("가운데", "What is in the center?"),
    ("멀리", "What is in the distance?"),
    ("가까이", "What is nearby?"),
    // nature
    ("하늘", "Describe the sky."),
    ("구름", "Describe the clouds."),
    ("산", "Describe the mountains."),
    ("바다", "Describe the ocean or sea."),
    ("호수", "Describe the lake."),
    ("강", "Describe the river."),
    ("나무", "Describe the trees."),
    ("숲", "Describe the forest."),
    ("꽃", "Describe the flowers."),
    ("해", "Describe the sun."),
    ("달", "Describe the moon."),
    // mood / time
    ("분위기", "What is the mood or atmosphere?"),
    ("느낌", "What is the mood or atmosphere?"),
    ("날씨", "What is the weather like?"),
    ("시간", "What time of day is it?"),
    ("계절", "What season does it look like?"),
    ("아침", "Is this morning or sunrise?"),
    ("저녁", "Is this evening or sunset?"),
    ("낮", "Is this daytime?"),
    ("밤", "Is this nighttime?"),
    // color
    ("무슨 색", "What colors do you see?"),
    ("무슨색", "What colors do you see?"),
    ("색깔", "What are the main colors?"),
    ("색이", "What colors are there?"),
    // weather
    ("맑", "Is it clear or sunny?"),
    ("흐", "Is it cloudy?"),
    ("비", "Is it raining?"),
    ("눈", "Is it snowing?"),
    ("안개", "Is there fog or mist?"),
    // man-made
    ("건물", "Are there any buildings?"),
    ("집", "Are there any houses?"),
    ("다리", "Is there a bridge?"),
    ("길", "Is there a road or path?"),
    // generic
    ("어디", "What place is this?"),
    ("장소", "What kind of place is this?"),
    ("어때", "How does this scene look?"),
    ("예뻐", "Is this beautiful?"),
];

/// Result of mapping a question, kept for logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMapping {
    pub prompt: String,
    pub subject: Option<&'static str>,
    pub pattern: Option<&'static str>,
}

#[must_use]
pub fn find_subject(question: &str) -> Option<(&'static str, &'static str)> {
    SUBJECT_TERMS
        .iter()
        .copied()
        .find(|(ko, _)| question.contains(ko))
}

#[must_use]
pub fn map_question(question: &str) -> PromptMapping {
    let subject = find_subject(question);
    let subject_en = subject.map(|(_, en)| en).unwrap_or(DEFAULT_SUBJECT);

    if let Some((pattern, template)) = QUESTION_PATTERNS
        .iter()
        .copied()
        .find(|(pattern, _)| question.contains(pattern))
    {
        return PromptMapping {
            prompt: template.replace("{subject}", subject_en),
            subject: subject.map(|(ko, _)| ko),
            pattern: Some(pattern),
        };
    }

    match subject {
        Some((ko, en)) => PromptMapping {
            prompt: format!("Describe {en}."),
            subject: Some(ko),
            pattern: None,
        },
        None => PromptMapping {
            prompt: DEFAULT_PROMPT.to_string(),
            subject: None,
            pattern: None,
        },
    }
}

#[must_use]
pub fn to_english_prompt(question: &str) -> String {
    map_question(question).prompt
}
